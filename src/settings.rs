// Host-wide settings file (spec §6 "Persisted layout", §9.1): API keys,
// allowed CORS origins, and the current-agent selector. Grounded on
// `mcp/config.rs`'s read-or-default / atomic-write idiom, reusing the same
// temp-file-then-rename shape as `agent_store::store::write_atomic`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Recognized top-level keys; an unknown key is a hard error (spec §9
/// "reject unknown keys") rather than being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(rename = "openAIApiKey", default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(rename = "anthropicApiKey", default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(rename = "openRouterApiKey", default, skip_serializing_if = "Option::is_none")]
    pub openrouter_api_key: Option<String>,
    #[serde(rename = "allowedOrigins", default)]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "currentAgent", default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
}

impl Settings {
    /// Resolves the OpenRouter key: explicit setting first, then
    /// `OPENROUTER_API_KEY` from the environment (spec §6 Environment).
    pub fn openrouter_api_key(&self) -> Option<String> {
        self.openrouter_api_key.clone().or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
    }

    pub fn openai_api_key(&self) -> Option<String> {
        self.openai_api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn anthropic_api_key(&self) -> Option<String> {
        self.anthropic_api_key.clone().or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the settings file, defaulting to an empty `Settings` if it
    /// doesn't exist yet (first run).
    pub async fn load(&self) -> Result<Settings, HostError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| HostError::ParseError(format!("invalid settings file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), HostError> {
        let json = serde_json::to_string_pretty(settings)?;
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
