// `POST /api/chat` handler (spec §6, §4.G).

use axum::extract::State;
use axum::{Json, Router};
use axum::routing::post;
use serde::{Deserialize, Serialize};

use crate::error::{ApiJson, HostError};
use crate::http::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/chat", post(send_chat))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatRequest {
    agent: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn send_chat(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, HostError> {
    let result = state
        .chat_engine
        .send_message(&request.agent, &request.message, state.shutdown.child_token())
        .await?;

    let warning = result
        .tool_loop_exhausted
        .then(|| "tool iteration limit reached before a final answer".to_string());

    Ok(Json(ChatResponse { text: result.text, warning }))
}
