//! Configuration Storage
//!
//! Reads and writes `storage.json`.
//! Location: ~/.oxideterm on macOS/Linux, %APPDATA%\OxideTerm on Windows

use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{StorageConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the OxideTerm configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("OxideTerm"));
        }
        dirs::home_dir()
            .map(|home| home.join(".oxideterm"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".oxideterm"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Path of the storage settings file
pub fn storage_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("storage.json"))
}

/// Loads and saves [`StorageConfig`]
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Storage at the default location
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: storage_file()?,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load settings. A missing file yields defaults; a corrupted one is
    /// backed up and replaced by defaults.
    pub async fn load(&self) -> Result<StorageConfig, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StorageConfig::default())
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        match serde_json::from_str::<StorageConfig>(&contents) {
            Ok(config) if config.version > CONFIG_VERSION => Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            }),
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("Storage config corrupted: {}", e);
                match self.backup().await {
                    Ok(backup_path) => tracing::warn!(
                        "Corrupted config backed up to {:?}, using defaults",
                        backup_path
                    ),
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted config: {}", backup_err)
                    }
                }
                Ok(StorageConfig::default())
            }
        }
    }

    /// Save settings (temp file + rename)
    pub async fn save(&self, config: &StorageConfig) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Copy the current file aside with a timestamp suffix
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }
        Ok(backup_path)
    }
}
