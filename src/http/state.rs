// Shared application state threaded through every axum handler (spec §4.I).
// Grounded on `serve/src/app.rs`'s `AppState`/`Arc<AppState>` + `with_state`
// pattern, generalized from one WebSocket field to the full set of host
// subsystems a REST surface needs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent_store::AgentStore;
use crate::chat_engine::ChatEngine;
use crate::events::EventBus;
use crate::llm::AdapterRegistry;
use crate::plugin_host::{ArtifactCache, PluginHost, PluginRegistry, PluginUpdater};
use crate::settings::SettingsStore;

#[derive(Clone)]
pub struct AppState {
    pub agent_store: Arc<AgentStore>,
    pub plugin_host: Arc<PluginHost>,
    pub plugin_registry: Arc<PluginRegistry>,
    pub artifact_cache: Arc<ArtifactCache>,
    pub updater: Arc<PluginUpdater>,
    pub adapters: Arc<AdapterRegistry>,
    pub chat_engine: Arc<ChatEngine>,
    pub events: Arc<EventBus>,
    pub settings: Arc<SettingsStore>,
    /// Cancelled at shutdown; every in-flight chat turn derives a child
    /// token from this one so a single shutdown signal reaches them all
    /// (spec §5 Shutdown step 2).
    pub shutdown: CancellationToken,
}
