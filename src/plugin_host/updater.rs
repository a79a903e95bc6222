// Update checking and atomic update-with-backup/rollback (spec §4.D).
// No teacher analog — the teacher never updates an installed plugin binary
// — built on the §4.B atomic-rename idiom plus a per-plugin-name lock, the
// same per-entity-lock shape as the agent turn-lock in §4.G.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::HostError;
use crate::plugin_host::artifact_cache::ArtifactCache;
use crate::plugin_host::manager::PluginHost;
use crate::plugin_host::registry::PluginRegistry;
use crate::version_compat::compare;

#[derive(Debug, Clone)]
pub struct UpdateAvailable {
    pub plugin_name: String,
    pub current_version: String,
    pub latest_version: String,
    pub auto_update: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub success: bool,
    pub new_version: String,
    pub backup_path: PathBuf,
}

/// Coordinates catalog-driven updates of already-bound plugins. Holds one
/// lock per plugin name so concurrent update requests for different
/// plugins proceed independently while same-name requests serialize.
pub struct PluginUpdater {
    registry: Arc<PluginRegistry>,
    cache: Arc<ArtifactCache>,
    host: Arc<PluginHost>,
    backups_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PluginUpdater {
    pub fn new(
        registry: Arc<PluginRegistry>,
        cache: Arc<ArtifactCache>,
        host: Arc<PluginHost>,
        backups_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            cache,
            host,
            backups_dir: backups_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, plugin_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(plugin_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Iterates every running plugin instance and compares its reported
    /// version against the registry's latest, per §4.A ordering.
    pub async fn check_updates(&self, bound_plugins: &[(String, String)]) -> Result<Vec<UpdateAvailable>, HostError> {
        let mut updates = Vec::new();

        for (plugin_name, current_version) in bound_plugins {
            let Some(entry) = self.registry.get(plugin_name).await else {
                continue;
            };
            let ordering = compare(current_version, &entry.latest_version)?;
            if ordering == std::cmp::Ordering::Less {
                updates.push(UpdateAvailable {
                    plugin_name: plugin_name.clone(),
                    current_version: current_version.clone(),
                    latest_version: entry.latest_version.clone(),
                    auto_update: entry.auto_update,
                });
            }
        }

        Ok(updates)
    }

    /// Update-with-backup-and-rollback. On any failure in steps 2-4, the
    /// backup is restored before the error is returned; `current_path` is
    /// never left in a corrupted or partially-updated state.
    pub async fn update_plugin(
        &self,
        plugin_name: &str,
        current_path: &Path,
        current_version: &str,
    ) -> Result<UpdateResult, HostError> {
        let lock = self.lock_for(plugin_name).await;
        let _guard = lock.lock().await;

        let entry = self
            .registry
            .get(plugin_name)
            .await
            .ok_or_else(|| HostError::NotFound(format!("plugin '{plugin_name}' not in registry")))?;

        // Idempotence: already at latest is a no-op success, no file touched.
        if compare(current_version, &entry.latest_version)? != std::cmp::Ordering::Less {
            return Ok(UpdateResult {
                success: true,
                new_version: current_version.to_string(),
                backup_path: PathBuf::new(),
            });
        }

        let backup_path = self.backup_path(plugin_name, current_version);
        if let Some(parent) = backup_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(current_path, &backup_path).await?;

        match self.try_update(&entry, current_path).await {
            Ok(()) => {
                match self.host.restart(plugin_name).await {
                    Ok(Some((owners, config))) => {
                        if let Err(e) = self.host.rebind(owners, plugin_name, config).await {
                            tracing::warn!(plugin = %plugin_name, error = ?e, "rebind-after-update failed, plugin left unbound");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(plugin = %plugin_name, error = ?e, "restart-after-update signal failed");
                    }
                }
                Ok(UpdateResult {
                    success: true,
                    new_version: entry.latest_version.clone(),
                    backup_path,
                })
            }
            Err(e) => {
                if let Err(restore_err) = tokio::fs::copy(&backup_path, current_path).await {
                    tracing::error!(plugin = %plugin_name, error = ?restore_err, "rollback copy failed after update failure");
                }
                Err(e)
            }
        }
    }

    async fn try_update(
        &self,
        entry: &crate::plugin_host::artifact_cache::PluginCatalogEntry,
        current_path: &Path,
    ) -> Result<(), HostError> {
        let (downloaded_path, _was_cached) = self.cache.get(entry).await?;
        let temp = current_path.with_extension(format!("new-{}", uuid::Uuid::new_v4()));
        tokio::fs::copy(&downloaded_path, &temp).await?;
        tokio::fs::rename(&temp, current_path).await?;
        Ok(())
    }

    pub async fn rollback(&self, backup_path: &Path, current_path: &Path) -> Result<(), HostError> {
        if !tokio::fs::try_exists(backup_path).await.unwrap_or(false) {
            return Err(HostError::NotFound(format!("backup not found: {}", backup_path.display())));
        }
        tokio::fs::copy(backup_path, current_path).await?;
        Ok(())
    }

    pub async fn list_backups(&self) -> Result<Vec<PathBuf>, HostError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.backups_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    pub async fn clean_old_backups(&self, max_age: Duration) -> Result<usize, HostError> {
        let mut removed = 0;
        for path in self.list_backups().await? {
            let metadata = tokio::fs::metadata(&path).await?;
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::now());
            let age = std::time::SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn backup_path(&self, plugin_name: &str, version: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        self.backups_dir.join(format!("{plugin_name}-{version}-{stamp}.bak"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with(entries_json: &str) -> Arc<PluginRegistry> {
        let file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), entries_json).await.unwrap();
        Arc::new(PluginRegistry::load(file.path()).await.unwrap())
    }

    #[tokio::test]
    async fn check_updates_reports_only_stale_plugins() {
        let registry = registry_with(
            r#"{"plugins": [
                {"name": "math", "latest_version": "2.0.0", "download_url_template": "https://x/{name}"},
                {"name": "stable", "latest_version": "1.0.0", "download_url_template": "https://x/{name}"}
            ]}"#,
        )
        .await;
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(cache_dir.path()));
        let host = Arc::new(PluginHost::new("1.0.0", "v1"));
        let backups_dir = tempfile::tempdir().unwrap();
        let updater = PluginUpdater::new(registry, cache, host, backups_dir.path());

        let bound = vec![("math".to_string(), "1.0.0".to_string()), ("stable".to_string(), "1.0.0".to_string())];
        let updates = updater.check_updates(&bound).await.unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].plugin_name, "math");
    }

    #[tokio::test]
    async fn update_to_already_installed_version_is_a_noop() {
        let registry = registry_with(
            r#"{"plugins": [{"name": "math", "latest_version": "1.0.0", "download_url_template": "https://x/{name}"}]}"#,
        )
        .await;
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(cache_dir.path()));
        let host = Arc::new(PluginHost::new("1.0.0", "v1"));
        let backups_dir = tempfile::tempdir().unwrap();
        let updater = PluginUpdater::new(registry, cache, host, backups_dir.path());

        let plugin_file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(plugin_file.path(), b"v1 bytes").await.unwrap();

        let result = updater.update_plugin("math", plugin_file.path(), "1.0.0").await.unwrap();
        assert!(result.success);
        assert_eq!(result.new_version, "1.0.0");
        // No backup created for a no-op update.
        assert_eq!(updater.list_backups().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn checksum_mismatch_restores_the_original_bytes() {
        let registry = registry_with(
            r#"{"plugins": [{"name": "math", "latest_version": "2.0.0", "download_url_template": "https://example.invalid/{name}", "checksum_sha256": "deadbeef"}]}"#,
        )
        .await;
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(cache_dir.path()));
        let host = Arc::new(PluginHost::new("1.0.0", "v1"));
        let backups_dir = tempfile::tempdir().unwrap();
        let updater = PluginUpdater::new(registry, cache, host, backups_dir.path());

        let plugin_file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(plugin_file.path(), b"original v1 bytes").await.unwrap();

        let err = updater.update_plugin("math", plugin_file.path(), "1.0.0").await.unwrap_err();
        assert!(matches!(err, HostError::DownloadFailed(_)));

        let bytes = tokio::fs::read(plugin_file.path()).await.unwrap();
        assert_eq!(bytes, b"original v1 bytes");
    }
}
