// `/api/agents` handlers (spec §6 endpoint table).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use crate::agent_store::{Agent, CreateAgentConfig};
use crate::error::{ApiJson, HostError};
use crate::http::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", get(list_agents).post(create_agent).delete(delete_agent))
        .route("/api/agents/:name", get(get_agent))
}

#[derive(Debug, Serialize)]
struct AgentListResponse {
    agents: Vec<Agent>,
    current: Option<String>,
}

async fn list_agents(State(state): State<AppState>) -> Json<AgentListResponse> {
    let agents = state.agent_store.list().await;
    let current = state.agent_store.current_name().await;
    Json(AgentListResponse { agents, current })
}

async fn get_agent(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Agent>, HostError> {
    let agent = state.agent_store.get(&name).await?;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateAgentRequest {
    name: String,
    #[serde(rename = "type")]
    agent_type: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    #[serde(rename = "systemPrompt")]
    system_prompt: Option<String>,
}

async fn create_agent(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), HostError> {
    let config = CreateAgentConfig {
        agent_type: request.agent_type,
        model: request.model,
        temperature: request.temperature,
        system_prompt: request.system_prompt,
    };
    let agent = state.agent_store.create(&request.name, config).await?;
    if let Err(e) = state.events.publish(crate::events::Event::new(
        "http",
        "broadcast",
        crate::events::EventKind::AgentCreated { agent_id: agent.name.clone() },
    )) {
        tracing::debug!(error = %e, "no subscribers for agent-created event");
    }
    Ok((StatusCode::CREATED, Json(agent)))
}

#[derive(Debug, Deserialize)]
struct DeleteAgentQuery {
    name: String,
}

async fn delete_agent(
    State(state): State<AppState>,
    Query(query): Query<DeleteAgentQuery>,
) -> Result<StatusCode, HostError> {
    let agent = state.agent_store.delete(&query.name).await?;
    for plugin_name in agent.plugins.keys() {
        if let Err(e) = state.plugin_host.unbind(&agent.name, plugin_name).await {
            tracing::warn!(agent = %agent.name, plugin = %plugin_name, error = ?e, "failed to unbind plugin on agent delete");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
