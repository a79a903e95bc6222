// The authoritative, concurrency-safe agent registry (spec §4.E). In-memory
// map guarded by a reader-writer lock, backed by a single JSON file written
// with atomic rename. Grounded on `services/agents.rs`'s `DefaultAgentService`
// (RwLock map, get/list/switch/current), extended with create/delete/set/save
// the teacher's read-mostly service does not need.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::agent_store::conversation::Conversation;
use crate::agent_store::types::{
    Agent, AgentMetadata, AgentSettings, AgentStats, AgentStatus, AgentType, CreateAgentConfig,
};
use crate::error::HostError;

const DEFAULT_MAX_HISTORY: usize = 200;

/// One record in the store: the persisted `Agent` plus its (unpersisted)
/// runtime conversation and the per-agent chat-turn lock (spec §4.G: at most
/// one in-flight turn per agent, other turns queue FIFO).
pub struct AgentRecord {
    pub agent: Agent,
    pub conversation: Conversation,
    pub turn_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedStoreDoc {
    agents: HashMap<String, Agent>,
    current: Option<String>,
}

pub struct AgentStore {
    path: PathBuf,
    agents: RwLock<HashMap<String, AgentRecord>>,
    current: RwLock<Option<String>>,
}

impl AgentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), agents: RwLock::new(HashMap::new()), current: RwLock::new(None) }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let store = Self::new(&path);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let doc: PersistedStoreDoc = serde_json::from_str(&content)
                    .map_err(|e| HostError::ParseError(format!("invalid agent store file: {e}")))?;
                let mut agents = store.agents.write().await;
                for (name, agent) in doc.agents {
                    agents.insert(
                        name,
                        AgentRecord {
                            agent,
                            conversation: Conversation::new(DEFAULT_MAX_HISTORY),
                            turn_lock: Arc::new(Mutex::new(())),
                        },
                    );
                }
                drop(agents);
                *store.current.write().await = doc.current;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(store)
    }

    pub async fn list(&self) -> Vec<Agent> {
        self.agents.read().await.values().map(|r| r.agent.clone()).collect()
    }

    pub async fn get(&self, name: &str) -> Result<Agent, HostError> {
        self.agents
            .read()
            .await
            .get(name)
            .map(|r| r.agent.clone())
            .ok_or_else(|| HostError::NotFound(format!("agent '{name}' not found")))
    }

    pub async fn current_name(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Returns the per-agent turn lock, used by the chat engine to serialize
    /// turns for a given agent (spec §4.G step 2).
    pub async fn turn_lock(&self, name: &str) -> Result<Arc<Mutex<()>>, HostError> {
        self.agents
            .read()
            .await
            .get(name)
            .map(|r| r.turn_lock.clone())
            .ok_or_else(|| HostError::NotFound(format!("agent '{name}' not found")))
    }

    pub async fn with_conversation<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> Result<R, HostError> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(name)
            .ok_or_else(|| HostError::NotFound(format!("agent '{name}' not found")))?;
        Ok(f(&mut record.conversation))
    }

    /// `Create(name, config)`. Rejects a name that already exists, a type
    /// tag not in the fixed set, and a model not listed under that type tag
    /// (spec §4.E Validation). A newly created agent inherits the current
    /// agent's settings as defaults.
    pub async fn create(&self, name: &str, config: CreateAgentConfig) -> Result<Agent, HostError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(name) {
            return Err(HostError::Conflict(format!("agent '{name}' already exists")));
        }

        let current_defaults = {
            let current_name = self.current.read().await.clone();
            current_name.and_then(|n| agents.get(&n)).map(|r| r.agent.settings.clone())
        };

        let agent_type = match &config.agent_type {
            Some(t) => AgentType::parse(t)?,
            None => AgentType::General,
        };

        let model = config
            .model
            .or_else(|| current_defaults.as_ref().map(|s| s.model.clone()))
            .unwrap_or_else(|| agent_type.default_model().to_string());

        if !agent_type.allowed_models().contains(&model.as_str()) {
            return Err(HostError::ParseError(format!(
                "model '{model}' is not valid for agent type '{agent_type:?}'"
            )));
        }

        let now = Utc::now();
        let settings = AgentSettings {
            model,
            temperature: config
                .temperature
                .or_else(|| current_defaults.as_ref().map(|s| s.temperature))
                .unwrap_or(0.7),
            system_prompt: config
                .system_prompt
                .or_else(|| current_defaults.as_ref().map(|s| s.system_prompt.clone()))
                .unwrap_or_default(),
            tool_call_timeout_secs: current_defaults.as_ref().and_then(|s| s.tool_call_timeout_secs),
            provider_options: current_defaults.map(|s| s.provider_options).unwrap_or_default(),
        };

        let agent = Agent {
            name: name.to_string(),
            agent_type,
            role: String::new(),
            capabilities: Default::default(),
            settings,
            plugins: HashMap::new(),
            enabled_mq_servers: Vec::new(),
            stats: AgentStats {
                created_at: Some(now),
                updated_at: Some(now),
                ..Default::default()
            },
            status: AgentStatus::Active,
            metadata: AgentMetadata::default(),
        };

        agents.insert(
            name.to_string(),
            AgentRecord {
                agent: agent.clone(),
                conversation: Conversation::new(DEFAULT_MAX_HISTORY),
                turn_lock: Arc::new(Mutex::new(())),
            },
        );

        Ok(agent)
    }

    /// `Switch`. `current` is either empty or an existing name (spec §4.E
    /// invariant).
    pub async fn switch(&self, name: &str) -> Result<(), HostError> {
        let agents = self.agents.read().await;
        if !agents.contains_key(name) {
            return Err(HostError::NotFound(format!("agent '{name}' not found")));
        }
        drop(agents);
        *self.current.write().await = Some(name.to_string());
        Ok(())
    }

    /// `Delete`. The caller is responsible for tearing down plugin
    /// subprocesses owned exclusively by this agent before or after this
    /// call (spec §3 "Agent" destroyed-by clause) — the store itself only
    /// removes the record.
    pub async fn delete(&self, name: &str) -> Result<Agent, HostError> {
        let mut agents = self.agents.write().await;
        let record = agents
            .remove(name)
            .ok_or_else(|| HostError::NotFound(format!("agent '{name}' not found")))?;
        drop(agents);

        let mut current = self.current.write().await;
        if current.as_deref() == Some(name) {
            *current = None;
        }

        Ok(record.agent)
    }

    pub async fn set(&self, name: &str, agent: Agent) -> Result<(), HostError> {
        let mut agents = self.agents.write().await;
        match agents.get_mut(name) {
            Some(record) => {
                record.agent = agent;
                Ok(())
            }
            None => {
                agents.insert(
                    name.to_string(),
                    AgentRecord {
                        agent,
                        conversation: Conversation::new(DEFAULT_MAX_HISTORY),
                        turn_lock: Arc::new(Mutex::new(())),
                    },
                );
                Ok(())
            }
        }
    }

    /// Persists agents + current selector to disk, excluding conversations
    /// and statistics-bearing runtime-only data per spec §6, via a temp-file
    /// write and atomic rename.
    pub async fn save(&self) -> Result<(), HostError> {
        let agents = self.agents.read().await;
        let doc = PersistedStoreDoc {
            agents: agents.iter().map(|(k, v)| (k.clone(), v.agent.clone())).collect(),
            current: self.current.read().await.clone(),
        };
        drop(agents);

        let json = serde_json::to_string_pretty(&doc)?;
        write_atomic(&self.path, &json).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), HostError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
