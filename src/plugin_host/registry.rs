// Plugin registry: the known-plugin catalog (spec §4.D, §6 "Registry file").
// Loaded from a JSON document at startup and reloadable on demand.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::HostError;
use crate::plugin_host::artifact_cache::PluginCatalogEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntryDoc {
    pub name: String,
    pub latest_version: String,
    pub download_url_template: String,
    #[serde(default)]
    pub checksum_sha256: Option<String>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub min_host_version: String,
    #[serde(default)]
    pub max_host_version: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub local_path: Option<String>,
}

impl From<CatalogEntryDoc> for PluginCatalogEntry {
    fn from(doc: CatalogEntryDoc) -> Self {
        PluginCatalogEntry {
            name: doc.name,
            latest_version: doc.latest_version,
            download_url_template: doc.download_url_template,
            checksum_sha256: doc.checksum_sha256,
            auto_update: doc.auto_update,
            min_host_version: doc.min_host_version,
            max_host_version: doc.max_host_version,
            api_version: doc.api_version,
            local_path: doc.local_path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryDoc {
    plugins: Vec<CatalogEntryDoc>,
}

/// Known-plugin catalog, reads take a shared lock, reload takes exclusive.
pub struct PluginRegistry {
    path: PathBuf,
    entries: RwLock<HashMap<String, PluginCatalogEntry>>,
}

impl PluginRegistry {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let entries = Self::read_entries(&path).await?;
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    async fn read_entries(path: &Path) -> Result<HashMap<String, PluginCatalogEntry>, HostError> {
        let content = tokio::fs::read_to_string(path).await?;
        let doc: RegistryDoc = serde_json::from_str(&content)
            .map_err(|e| HostError::ParseError(format!("invalid registry file: {e}")))?;
        Ok(doc
            .plugins
            .into_iter()
            .map(|entry| (entry.name.clone(), PluginCatalogEntry::from(entry)))
            .collect())
    }

    pub async fn reload(&self) -> Result<(), HostError> {
        let fresh = Self::read_entries(&self.path).await?;
        *self.entries.write().await = fresh;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<PluginCatalogEntry> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<PluginCatalogEntry> {
        self.entries.read().await.values().cloned().collect()
    }
}
