// `/api/plugins` handlers (spec §6 endpoint table, §4.B-D).

use std::path::Path;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::agent_store::PluginBinding;
use crate::error::{ApiJson, HostError};
use crate::http::state::AppState;
use crate::plugin_host::PluginProcessConfig;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/plugins", get(list_plugins).post(enable_plugin))
        .route("/api/plugins/:name/update", post(update_plugin))
        .route("/api/plugins/:name/rollback", post(rollback_plugin))
        .route("/api/plugins/check-updates", get(check_updates))
        .route("/api/plugins/backups", get(list_backups))
        .route("/api/plugins/backups/clean", post(clean_backups))
}

#[derive(Debug, Serialize)]
struct CatalogEntryView {
    name: String,
    latest_version: String,
    auto_update: bool,
}

#[derive(Debug, Serialize)]
struct BindingView {
    agent: String,
    plugin: String,
    local_executable_path: String,
    enabled: bool,
    last_known_version: String,
}

#[derive(Debug, Serialize)]
struct PluginListResponse {
    catalog: Vec<CatalogEntryView>,
    bindings: Vec<BindingView>,
}

async fn list_plugins(State(state): State<AppState>) -> Json<PluginListResponse> {
    let catalog = state
        .plugin_registry
        .list()
        .await
        .into_iter()
        .map(|e| CatalogEntryView { name: e.name, latest_version: e.latest_version, auto_update: e.auto_update })
        .collect();

    let mut bindings = Vec::new();
    for agent in state.agent_store.list().await {
        for (plugin_name, binding) in &agent.plugins {
            bindings.push(BindingView {
                agent: agent.name.clone(),
                plugin: plugin_name.clone(),
                local_executable_path: binding.local_executable_path.clone(),
                enabled: binding.enabled,
                last_known_version: binding.last_known_version.clone(),
            });
        }
    }

    Json(PluginListResponse { catalog, bindings })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnablePluginRequest {
    name: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct EnablePluginResponse {
    name: String,
    description: String,
    version: String,
}

/// Enables a plugin on the current agent, spawning the shared instance on
/// first bind (spec §4.C). Refuses the bind outright on incompatibility;
/// the agent's existing bindings are left untouched either way.
async fn enable_plugin(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<EnablePluginRequest>,
) -> Result<Json<EnablePluginResponse>, HostError> {
    let current = state
        .agent_store
        .current_name()
        .await
        .ok_or_else(|| HostError::NotFound("no current agent selected".to_string()))?;

    let config = PluginProcessConfig {
        name: request.name.clone(),
        executable_path: request.path.clone(),
        args: vec![],
        env: Default::default(),
    };

    let definition = state.plugin_host.bind(&current, &request.name, config).await?;
    let version = state.plugin_host.version(&request.name).await.unwrap_or_default();

    let mut agent = state.agent_store.get(&current).await?;
    agent.plugins.insert(
        request.name.clone(),
        PluginBinding { local_executable_path: request.path, enabled: true, last_known_version: version.clone() },
    );
    state.agent_store.set(&current, agent).await?;

    if let Err(e) = state.events.publish(crate::events::Event::new(
        "http",
        &current,
        crate::events::EventKind::PluginEnabled { agent_id: current.clone(), plugin_name: request.name.clone() },
    )) {
        tracing::debug!(error = %e, "no subscribers for plugin-enabled event");
    }

    Ok(Json(EnablePluginResponse { name: definition.name, description: definition.description, version }))
}

/// Finds any agent currently bound to `plugin_name` and returns its binding,
/// used to resolve the on-disk path an update/rollback operates on.
async fn find_binding(state: &AppState, plugin_name: &str) -> Result<PluginBinding, HostError> {
    for agent in state.agent_store.list().await {
        if let Some(binding) = agent.plugins.get(plugin_name) {
            return Ok(binding.clone());
        }
    }
    Err(HostError::NotFound(format!("plugin '{plugin_name}' is not bound to any agent")))
}

/// Propagates a plugin's new version to every agent's binding of it, after
/// a successful update or rollback.
async fn propagate_version(state: &AppState, plugin_name: &str, new_version: &str) -> Result<(), HostError> {
    for mut agent in state.agent_store.list().await {
        if let Some(binding) = agent.plugins.get_mut(plugin_name) {
            binding.last_known_version = new_version.to_string();
            let name = agent.name.clone();
            state.agent_store.set(&name, agent).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    success: bool,
    new_version: String,
    backup_path: String,
}

async fn update_plugin(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<UpdateResponse>, HostError> {
    let binding = find_binding(&state, &name).await?;
    let current_path = Path::new(&binding.local_executable_path);

    let result = state.updater.update_plugin(&name, current_path, &binding.last_known_version).await?;
    propagate_version(&state, &name, &result.new_version).await?;

    Ok(Json(UpdateResponse {
        success: result.success,
        new_version: result.new_version,
        backup_path: result.backup_path.to_string_lossy().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RollbackRequest {
    #[serde(rename = "backupPath")]
    backup_path: String,
}

async fn rollback_plugin(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    ApiJson(request): ApiJson<RollbackRequest>,
) -> Result<Json<serde_json::Value>, HostError> {
    let binding = find_binding(&state, &name).await?;
    let current_path = Path::new(&binding.local_executable_path);
    let backup_path = Path::new(&request.backup_path);

    state.updater.rollback(backup_path, current_path).await?;
    match state.plugin_host.restart(&name).await {
        Ok(Some((owners, config))) => {
            if let Err(e) = state.plugin_host.rebind(owners, &name, config).await {
                tracing::warn!(plugin = %name, error = ?e, "rebind-after-rollback failed, plugin left unbound");
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(plugin = %name, error = ?e, "restart-after-rollback failed");
        }
    }

    Ok(Json(serde_json::json!({"restored": true})))
}

async fn check_updates(State(state): State<AppState>) -> Result<Json<Vec<serde_json::Value>>, HostError> {
    let mut bound = Vec::new();
    for agent in state.agent_store.list().await {
        for (name, binding) in &agent.plugins {
            bound.push((name.clone(), binding.last_known_version.clone()));
        }
    }
    bound.sort();
    bound.dedup();

    let updates = state.updater.check_updates(&bound).await?;
    Ok(Json(
        updates
            .into_iter()
            .map(|u| {
                serde_json::json!({
                    "pluginName": u.plugin_name,
                    "currentVersion": u.current_version,
                    "latestVersion": u.latest_version,
                    "autoUpdate": u.auto_update,
                })
            })
            .collect(),
    ))
}

async fn list_backups(State(state): State<AppState>) -> Result<Json<Vec<String>>, HostError> {
    let backups = state.updater.list_backups().await?;
    Ok(Json(backups.into_iter().map(|p| p.to_string_lossy().to_string()).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CleanBackupsRequest {
    max_age_days: u64,
}

async fn clean_backups(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CleanBackupsRequest>,
) -> Result<Json<serde_json::Value>, HostError> {
    let max_age = Duration::from_secs(request.max_age_days.saturating_mul(86_400));
    let removed = state.updater.clean_old_backups(max_age).await?;
    Ok(Json(serde_json::json!({"removed": removed})))
}
