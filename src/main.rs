// Host entry point: load configuration, wire subsystems, serve HTTP, and
// shut down in the order spec §5 requires (close listener, cancel in-flight
// turns, drain turn locks, tear down plugin instances, flush the agent
// store). Grounded on the teacher's `main.rs` tracing/dotenvy bootstrap,
// generalized from an `eframe::run_native` desktop loop to an axum server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agentforge::agent_store::AgentStore;
use agentforge::chat_engine::ChatEngine;
use agentforge::events::EventBus;
use agentforge::http::{self, AppState};
use agentforge::llm::{AdapterRegistry, OpenRouterAdapter};
use agentforge::plugin_host::{spawn_health_check_loop, ArtifactCache, PluginHost, PluginRegistry, PluginUpdater};
use agentforge::settings::SettingsStore;
use agentforge::version;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn data_dir() -> std::path::PathBuf {
    std::env::var("AGENTFORGE_DATA_DIR").map(std::path::PathBuf::from).unwrap_or_else(|_| std::path::PathBuf::from("."))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!(version = %version::full_version_info(), "starting agentforge-host");

    let data_dir = data_dir();
    let settings_store = Arc::new(SettingsStore::new(data_dir.join("settings.json")));
    let settings = settings_store.load().await?;

    let agent_store = Arc::new(AgentStore::load(data_dir.join("agents.json")).await?);

    let plugin_registry_path = data_dir.join("plugins.json");
    let plugin_registry = match PluginRegistry::load(&plugin_registry_path).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::warn!(error = ?e, path = %plugin_registry_path.display(), "no plugin registry found, starting with an empty catalog");
            tokio::fs::write(&plugin_registry_path, r#"{"plugins": []}"#).await?;
            Arc::new(PluginRegistry::load(&plugin_registry_path).await?)
        }
    };

    let artifact_cache = Arc::new(ArtifactCache::new(data_dir.join("plugin-cache")));
    let plugin_host = Arc::new(PluginHost::new(version::VERSION, version::API_VERSION));
    let updater = Arc::new(PluginUpdater::new(
        plugin_registry.clone(),
        artifact_cache.clone(),
        plugin_host.clone(),
        data_dir.join("plugin-backups"),
    ));

    let adapters = Arc::new(AdapterRegistry::new());
    if let Some(key) = settings.openrouter_api_key() {
        adapters.register("openrouter", Arc::new(OpenRouterAdapter::new(key))).await;
    } else {
        tracing::warn!("no OpenRouter API key configured; chat requests against that provider will fail");
    }

    let chat_engine = Arc::new(ChatEngine::new(agent_store.clone(), plugin_host.clone(), adapters.clone()));
    let events = Arc::new(EventBus::new());
    let shutdown = CancellationToken::new();

    let state = AppState {
        agent_store: agent_store.clone(),
        plugin_host: plugin_host.clone(),
        plugin_registry,
        artifact_cache,
        updater,
        adapters,
        chat_engine,
        events,
        settings: settings_store,
        shutdown: shutdown.clone(),
    };

    let health_check_handle = spawn_health_check_loop(plugin_host.clone(), HEALTH_CHECK_INTERVAL);

    let app = http::router(state);
    let addr: SocketAddr = std::env::var("AGENTFORGE_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Shutdown sequence (spec §5): the HTTP listener is already closed by
    // `with_graceful_shutdown` returning; cancel in-flight turns, give them
    // a grace period to observe cancellation and roll back, then tear down
    // plugin subprocesses and flush the agent store.
    tracing::info!("shutting down: cancelling in-flight turns");
    shutdown.cancel();
    tokio::time::sleep(SHUTDOWN_DRAIN_TIMEOUT).await;

    health_check_handle.abort();

    tracing::info!("shutting down: tearing down plugin instances");
    plugin_host.shutdown_all().await;

    tracing::info!("shutting down: flushing agent store");
    agent_store.save().await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }
}
