// Process-wide plugin-host registry. Owns every running plugin instance,
// shared by refcount among the agents that have it enabled (spec §3
// "Running plugin instance", §4.C Lifecycle). Generalizes the teacher's
// flat `HashMap<id, RunningPlugin>` (mcp/manager.rs) with an
// `owning_agents: HashSet<String>` so an instance's lifetime is the longest
// enabling agent's bind, not tied to a single owner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::error::HostError;
use crate::plugin_host::client::{PluginClient, PluginCompatibility};
use crate::plugin_host::protocol::FunctionDefinition;
use crate::plugin_host::stdio::{PluginProcessConfig, StdioTransport};
use crate::version_compat::{is_api_compatible, is_compatible};

pub const DEFAULT_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const PLUGIN_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const UNHEALTHY_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unresponsive,
}

struct RunningInstance {
    client: Arc<tokio::sync::Mutex<PluginClient<StdioTransport>>>,
    definition: FunctionDefinition,
    compatibility: PluginCompatibility,
    owning_agents: HashSet<String>,
    consecutive_health_failures: u32,
    last_health: Option<HealthStatus>,
    /// Kept so `restart` can hand it back to the caller for `rebind`,
    /// without the caller having to reconstruct spawn args/env itself.
    config: PluginProcessConfig,
}

/// Process-wide registry mapping plugin name to its (at most one) running
/// instance. `bind`/`unbind` manage the refcount; the subprocess exists iff
/// the refcount is greater than zero.
pub struct PluginHost {
    instances: RwLock<HashMap<String, RunningInstance>>,
    host_version: String,
    host_api_version: String,
    tool_call_timeout: Duration,
}

impl PluginHost {
    pub fn new(host_version: impl Into<String>, host_api_version: impl Into<String>) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            host_version: host_version.into(),
            host_api_version: host_api_version.into(),
            tool_call_timeout: DEFAULT_TOOL_CALL_TIMEOUT,
        }
    }

    pub fn with_tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.tool_call_timeout = timeout;
        self
    }

    /// Binds `plugin_name` to `agent_name`, spawning the subprocess on first
    /// bind. Refuses the bind (without touching any existing binding) when
    /// the plugin's declared compatibility triple rejects this host.
    pub async fn bind(
        &self,
        agent_name: &str,
        plugin_name: &str,
        config: PluginProcessConfig,
    ) -> Result<FunctionDefinition, HostError> {
        let mut instances = self.instances.write().await;

        if let Some(instance) = instances.get_mut(plugin_name) {
            instance.owning_agents.insert(agent_name.to_string());
            return Ok(instance.definition.clone());
        }

        let stored_config = config.clone();
        let mut transport = StdioTransport::new(config);
        let handshake = timeout(PLUGIN_STARTUP_TIMEOUT, transport.start())
            .await
            .map_err(|_| HostError::PluginStartupFailed(format!("{plugin_name}: startup timed out")))??;
        let _ = handshake;

        let mut client = PluginClient::new(transport);
        let (definition, compatibility) = timeout(PLUGIN_STARTUP_TIMEOUT, client.initialize())
            .await
            .map_err(|_| HostError::PluginStartupFailed(format!("{plugin_name}: handshake timed out")))??;

        if !is_compatible(
            &self.host_version,
            &compatibility.version,
            &compatibility.min_host_version,
            &compatibility.max_host_version,
        )? {
            let _ = client.transport_mut().close().await;
            return Err(HostError::IncompatiblePlugin(format!(
                "{plugin_name} v{} requires host in [{}, {}], host is {}",
                compatibility.version, compatibility.min_host_version, compatibility.max_host_version, self.host_version
            )));
        }

        if !is_api_compatible(&self.host_api_version, &compatibility.api_version) {
            let _ = client.transport_mut().close().await;
            return Err(HostError::IncompatiblePlugin(format!(
                "{plugin_name} declares API version '{}', host speaks '{}'",
                compatibility.api_version, self.host_api_version
            )));
        }

        let mut owning_agents = HashSet::new();
        owning_agents.insert(agent_name.to_string());

        instances.insert(
            plugin_name.to_string(),
            RunningInstance {
                client: Arc::new(tokio::sync::Mutex::new(client)),
                definition: definition.clone(),
                compatibility,
                owning_agents,
                consecutive_health_failures: 0,
                last_health: None,
                config: stored_config,
            },
        );

        Ok(definition)
    }

    /// Decrements the refcount; on reaching zero, tears the instance down
    /// (orderly close, then kill after the grace period — `StdioTransport`'s
    /// own `close` already implements that race).
    pub async fn unbind(&self, agent_name: &str, plugin_name: &str) -> Result<(), HostError> {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.get_mut(plugin_name) else {
            return Ok(());
        };

        instance.owning_agents.remove(agent_name);
        if instance.owning_agents.is_empty() {
            if let Some(instance) = instances.remove(plugin_name) {
                instance.client.lock().await.transport_mut().close().await?;
            }
        }

        Ok(())
    }

    pub async fn definition(&self, plugin_name: &str) -> Option<FunctionDefinition> {
        let instances = self.instances.read().await;
        instances.get(plugin_name).map(|i| i.definition.clone())
    }

    pub async fn version(&self, plugin_name: &str) -> Option<String> {
        let instances = self.instances.read().await;
        instances.get(plugin_name).map(|i| i.compatibility.version.clone())
    }

    pub async fn refcount(&self, plugin_name: &str) -> usize {
        let instances = self.instances.read().await;
        instances.get(plugin_name).map(|i| i.owning_agents.len()).unwrap_or(0)
    }

    pub async fn is_running(&self, plugin_name: &str) -> bool {
        let instances = self.instances.read().await;
        instances.contains_key(plugin_name)
    }

    /// Executes a single tool call within the per-agent timeout. Timeout,
    /// transport, and plugin-reported failures are distinct `HostError`
    /// kinds per spec §4.C — the caller (chat engine) turns each into a
    /// tool-result payload rather than aborting the turn.
    pub async fn call_tool(&self, plugin_name: &str, args: Value) -> Result<Value, HostError> {
        self.call_tool_with_timeout(plugin_name, args, self.tool_call_timeout).await
    }

    /// Clones the instance's client handle and releases the registry lock
    /// before awaiting the call, so one in-flight call never blocks `bind`,
    /// `unbind`, or concurrent calls to other plugins (spec §5: plugin
    /// `Call` invocations run outside any store lock). Concurrent calls to
    /// the *same* plugin still serialize on the client's own mutex, since a
    /// single subprocess handles one request at a time.
    pub async fn call_tool_with_timeout(
        &self,
        plugin_name: &str,
        args: Value,
        call_timeout: Duration,
    ) -> Result<Value, HostError> {
        let client = {
            let instances = self.instances.read().await;
            let instance = instances
                .get(plugin_name)
                .ok_or_else(|| HostError::NotFound(format!("plugin '{plugin_name}' not bound")))?;
            instance.client.clone()
        };

        let mut client = client.lock().await;
        match timeout(call_timeout, client.call(args)).await {
            Ok(result) => result,
            Err(_) => Err(HostError::ToolCallTimeout(format!(
                "plugin '{plugin_name}' did not respond within {call_timeout:?}"
            ))),
        }
    }

    /// Runs one round of health checks against every running instance.
    /// Three consecutive failures mark the instance unhealthy without
    /// killing the subprocess (spec §4.C Health).
    pub async fn run_health_checks(&self) -> HashMap<String, HealthStatus> {
        // Snapshot the client handles, then release the registry lock before
        // awaiting any health check — same rationale as `call_tool_with_timeout`.
        let clients: Vec<(String, Arc<tokio::sync::Mutex<PluginClient<StdioTransport>>>)> = {
            let instances = self.instances.read().await;
            instances.iter().map(|(name, instance)| (name.clone(), instance.client.clone())).collect()
        };

        let mut outcomes = Vec::with_capacity(clients.len());
        for (name, client) in clients {
            let mut client = client.lock().await;
            let outcome = timeout(HEALTH_CHECK_TIMEOUT, client.health_check()).await;
            outcomes.push((name, matches!(outcome, Ok(Ok(())))));
        }

        let mut instances = self.instances.write().await;
        let mut results = HashMap::new();
        for (name, healthy) in outcomes {
            let Some(instance) = instances.get_mut(&name) else { continue };

            if healthy {
                instance.consecutive_health_failures = 0;
                instance.last_health = Some(HealthStatus::Healthy);
                results.insert(name, HealthStatus::Healthy);
            } else {
                instance.consecutive_health_failures += 1;
                if instance.consecutive_health_failures >= UNHEALTHY_THRESHOLD {
                    instance.last_health = Some(HealthStatus::Unresponsive);
                    results.insert(name, HealthStatus::Unresponsive);
                } else if let Some(status) = instance.last_health {
                    results.insert(name, status);
                } else {
                    results.insert(name, HealthStatus::Healthy);
                }
            }
        }

        results
    }

    /// Tears down the running instance for `plugin_name` and hands back its
    /// owning agents plus the config it was last spawned with, so the caller
    /// can `rebind` against the updated binary (spec §4.D step 4, §8
    /// invariant `r = |{agents with p enabled}|`). The instance is gone from
    /// the registry until that `rebind` call completes — callers must not
    /// drop the returned owners/config without rebinding, or every agent
    /// that had this plugin enabled is left without it.
    pub async fn restart(
        &self,
        plugin_name: &str,
    ) -> Result<Option<(HashSet<String>, PluginProcessConfig)>, HostError> {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.remove(plugin_name) else {
            return Ok(None);
        };
        let owners = instance.owning_agents.clone();
        let config = instance.config.clone();
        instance.client.lock().await.transport_mut().close().await?;
        Ok(Some((owners, config)))
    }

    /// Re-spawns `plugin_name` and re-attaches the given owning agents,
    /// used to complete a `restart` once the new binary is in place.
    pub async fn rebind(
        &self,
        owners: HashSet<String>,
        plugin_name: &str,
        config: crate::plugin_host::stdio::PluginProcessConfig,
    ) -> Result<FunctionDefinition, HostError> {
        let mut definition = None;
        for owner in &owners {
            definition = Some(self.bind(owner, plugin_name, config.clone()).await?);
        }
        definition.ok_or_else(|| HostError::NotFound(format!("no owners to rebind '{plugin_name}'")))
    }

    pub async fn owning_agents(&self, plugin_name: &str) -> HashSet<String> {
        let instances = self.instances.read().await;
        instances.get(plugin_name).map(|i| i.owning_agents.clone()).unwrap_or_default()
    }

    /// Process-wide shutdown: close every instance's transport regardless of
    /// refcount, in whatever order the map yields.
    pub async fn shutdown_all(&self) {
        let mut instances = self.instances.write().await;
        for (name, instance) in instances.drain() {
            let mut client = instance.client.lock().await;
            if let Err(e) = timeout(SHUTDOWN_GRACE, client.transport_mut().close()).await {
                tracing::warn!(plugin = %name, error = ?e, "plugin shutdown exceeded grace period");
            }
        }
    }
}

/// Spawns the periodic health-check task described in spec §4.C. Returns a
/// handle the caller can abort on process shutdown.
pub fn spawn_health_check_loop(host: Arc<PluginHost>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let statuses = host.run_health_checks().await;
            for (name, status) in statuses {
                if status == HealthStatus::Unresponsive {
                    tracing::warn!(plugin = %name, "plugin instance unresponsive after repeated health checks");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refcount_zero_when_never_bound() {
        let host = PluginHost::new("1.0.0", "v1");
        assert_eq!(host.refcount("math").await, 0);
        assert!(!host.is_running("math").await);
    }

    #[tokio::test]
    async fn bind_nonexistent_binary_fails_with_startup_error() {
        let host = PluginHost::new("1.0.0", "v1");
        let config = PluginProcessConfig {
            name: "math".to_string(),
            executable_path: "/nonexistent/plugin-binary".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let err = host.bind("agent1", "math", config).await.unwrap_err();
        assert!(matches!(err, HostError::PluginStartupFailed(_)));
        assert_eq!(host.refcount("math").await, 0);
    }

    #[tokio::test]
    async fn unbind_on_unknown_plugin_is_a_noop() {
        let host = PluginHost::new("1.0.0", "v1");
        assert!(host.unbind("agent1", "math").await.is_ok());
    }

    #[tokio::test]
    async fn call_tool_on_unbound_plugin_is_not_found() {
        let host = PluginHost::new("1.0.0", "v1");
        let err = host.call_tool("math", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }
}
