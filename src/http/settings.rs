// `GET/POST /api/settings` handlers (spec §6).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{ApiJson, HostError};
use crate::http::state::AppState;
use crate::settings::Settings;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/settings", get(get_settings).post(set_settings))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, HostError> {
    let settings = state.settings.load().await?;
    Ok(Json(settings))
}

async fn set_settings(
    State(state): State<AppState>,
    ApiJson(settings): ApiJson<Settings>,
) -> Result<Json<Settings>, HostError> {
    state.settings.save(&settings).await?;
    Ok(Json(settings))
}
