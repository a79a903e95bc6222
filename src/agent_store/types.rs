// Agent data model (spec §3 "Agent"). Fields are grouped the way
// `agent/config.rs`'s `JsonAgentConfig` groups them (provider/model,
// parameters, capabilities, metadata), generalized with the fixed
// type-tag/model table and plugin-binding map this host adds.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Constrains which models may be chosen (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    ToolCalling,
    General,
    Research,
}

impl AgentType {
    pub fn allowed_models(&self) -> &'static [&'static str] {
        match self {
            AgentType::ToolCalling => &["gpt-4.1-nano", "gpt-4.1", "anthropic/claude-3.5-sonnet"],
            AgentType::General => &["gpt-4o-mini", "anthropic/claude-3-haiku"],
            AgentType::Research => &["anthropic/claude-3.5-sonnet", "gpt-4.1"],
        }
    }

    pub fn default_model(&self) -> &'static str {
        self.allowed_models()[0]
    }

    pub fn parse(s: &str) -> Result<Self, HostError> {
        match s {
            "tool-calling" => Ok(AgentType::ToolCalling),
            "general" => Ok(AgentType::General),
            "research" => Ok(AgentType::Research),
            other => Err(HostError::ParseError(format!("unknown agent type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: String,
    /// Per-provider options (API base overrides, etc.), opaque to the
    /// agent store itself.
    #[serde(default)]
    pub provider_options: HashMap<String, serde_json::Value>,
    /// Overrides the chat engine's default 30s per-tool-call timeout
    /// (spec §4.G step c) when set.
    #[serde(default)]
    pub tool_call_timeout_secs: Option<u64>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: AgentType::General.default_model().to_string(),
            temperature: default_temperature(),
            system_prompt: String::new(),
            provider_options: HashMap::new(),
            tool_call_timeout_secs: None,
        }
    }
}

/// A bound plugin entry (spec §3 "plugin bindings").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginBinding {
    pub local_executable_path: String,
    pub enabled: bool,
    pub last_known_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentStats {
    pub message_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl AgentStats {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }

    pub fn average_tokens(&self) -> f64 {
        if self.message_count == 0 {
            0.0
        } else {
            self.total_tokens() as f64 / self.message_count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub favorite: bool,
}

/// An agent configuration and its bound plugins. The `conversation` field
/// lives alongside this struct at runtime (`agent_store::store::AgentStore`)
/// but is deliberately excluded from `Serialize`/`Deserialize` here — it is
/// never persisted (spec §3 invariant, §6 "Agent store file").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    pub settings: AgentSettings,
    #[serde(default)]
    pub plugins: HashMap<String, PluginBinding>,
    #[serde(default)]
    pub enabled_mq_servers: Vec<String>,
    #[serde(default)]
    pub stats: AgentStats,
    #[serde(default = "default_status")]
    pub status: AgentStatus,
    #[serde(default)]
    pub metadata: AgentMetadata,
}

fn default_status() -> AgentStatus {
    AgentStatus::Active
}

/// The recognized create-time options (spec §9 "Configuration with
/// recognized options"). Unknown keys are rejected by `serde(deny_unknown_fields)`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CreateAgentConfig {
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Option<String>,
}

impl Agent {
    /// Validates that `agent_type`/`settings.model` are consistent with the
    /// fixed model-per-type table (spec §3 invariant).
    pub fn validate_type_model_consistency(&self) -> Result<(), HostError> {
        if !self.agent_type.allowed_models().contains(&self.settings.model.as_str()) {
            return Err(HostError::ParseError(format!(
                "model '{}' is not valid for agent type '{:?}'",
                self.settings.model, self.agent_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_parse_rejects_unknown() {
        assert!(AgentType::parse("tool-calling").is_ok());
        assert!(AgentType::parse("bogus").is_err());
    }

    #[test]
    fn stats_average_tokens_guards_against_div_by_zero() {
        let stats = AgentStats::default();
        assert_eq!(stats.average_tokens(), 0.0);
    }

    #[test]
    fn validate_type_model_consistency_rejects_mismatch() {
        let agent = Agent {
            name: "a1".to_string(),
            agent_type: AgentType::ToolCalling,
            role: String::new(),
            capabilities: HashSet::new(),
            settings: AgentSettings { model: "anthropic/claude-3-haiku".to_string(), ..Default::default() },
            plugins: HashMap::new(),
            enabled_mq_servers: Vec::new(),
            stats: AgentStats::default(),
            status: AgentStatus::Active,
            metadata: AgentMetadata::default(),
        };
        assert!(agent.validate_type_model_consistency().is_err());
    }
}
