//! REST surface (spec §4.I, §6): axum router, shared `AppState`, and one
//! handler module per endpoint group. No teacher analog — the teacher is a
//! desktop `eframe` app — grounded on `serve/src/app.rs`'s `AppState`/
//! `Router::with_state` pattern.

pub mod agents;
pub mod chat;
pub mod plugins;
pub mod settings;
pub mod state;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;

pub use state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: crate::version::version_string() })
}

/// Reflects the request's `Origin` header back as `Access-Control-Allow-Origin`
/// only when it matches an entry in `settings.json`'s `allowedOrigins` (spec
/// §6 Environment / §9.1). No wildcard fallback: an unset or empty allow-list
/// means no cross-origin requests are permitted.
async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(axum::http::header::ORIGIN).cloned();
    let mut response = next.run(request).await;

    if let Some(origin) = origin {
        if let Ok(settings) = state.settings.load().await {
            if let Ok(origin_str) = origin.to_str() {
                if settings.allowed_origins.iter().any(|allowed| allowed == origin_str) {
                    if let Ok(value) = HeaderValue::from_str(origin_str) {
                        response.headers_mut().insert(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    }
                }
            }
        }
    }

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .merge(agents::router())
        .merge(chat::router())
        .merge(plugins::router())
        .merge(settings::router())
        .layer(middleware::from_fn_with_state(state.clone(), cors_middleware))
        .with_state(state)
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}
