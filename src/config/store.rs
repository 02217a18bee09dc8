use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads; writers persist to disk first, then
/// swap the cache.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open the store, writing defaults when the file does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str::<AppConfig>(&json)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, writing defaults", path.display());
                let config = AppConfig::default();
                Self::save(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn save(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(config)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Validate and persist a new configuration. The file is left untouched
    /// when validation fails.
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        Self::save(&self.path, &config).await?;
        self.cache.store(Arc::new(config));
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}
