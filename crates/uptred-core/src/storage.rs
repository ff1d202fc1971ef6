//! Storage layer for persistent data (settings only - uploads are in SQLite)

use crate::error::UptredError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use uptred_types::TransferSettings;

const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "uploads.db";

/// Storage manager for the data directory
#[derive(Clone, Debug)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Create the data directory if needed
    pub async fn new(data_dir: PathBuf) -> Result<Self, UptredError> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Load settings, falling back to defaults when the file is missing
    /// or unreadable
    pub async fn load_settings(&self) -> Result<TransferSettings, UptredError> {
        let path = self.data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(TransferSettings::default());
        }

        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                Ok(TransferSettings::default())
            }
        }
    }

    pub async fn save_settings(&self, settings: &TransferSettings) -> Result<(), UptredError> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.data_dir.join(SETTINGS_FILE), content).await?;
        Ok(())
    }
}
