//! Durable storage of the sync state record
//!
//! The whole state is one versioned JSON record. Writes go through a
//! temp file and rename so a crash never leaves a torn record; a record
//! that cannot be read or carries an unknown version is reported as a
//! rebuild signal rather than a hard failure.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::state::SyncStateRecord;

/// Current record format version
pub const STATE_VERSION: u32 = 1;

/// Outcome of loading the persisted record
#[derive(Debug)]
pub enum LoadOutcome {
    /// A readable, version-compatible record
    Loaded(SyncStateRecord),
    /// Nothing usable on disk; the caller should rebuild from the vault
    Rebuild { reason: String },
}

/// File-backed persistence for [`SyncStateRecord`]
#[derive(Debug, Clone)]
pub struct StatePersistence {
    path: PathBuf,
}

impl StatePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, signalling rebuild on anything unusable.
    pub async fn load(&self) -> Result<LoadOutcome> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(LoadOutcome::Rebuild {
                reason: "no state record on disk".to_string(),
            });
        }

        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("State record unreadable: {}", e);
                return Ok(LoadOutcome::Rebuild {
                    reason: format!("unreadable state record: {e}"),
                });
            }
        };

        let record: SyncStateRecord = match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!("State record failed to parse: {}", e);
                return Ok(LoadOutcome::Rebuild {
                    reason: format!("corrupt state record: {e}"),
                });
            }
        };

        if record.version > STATE_VERSION {
            warn!(
                "State record version {} is newer than supported {}",
                record.version, STATE_VERSION
            );
            return Ok(LoadOutcome::Rebuild {
                reason: format!("unsupported state version {}", record.version),
            });
        }

        debug!(
            "Loaded state record: {} mapped, {} deleted",
            record.mapping.len(),
            record.deleted_ids.len()
        );
        Ok(LoadOutcome::Loaded(record))
    }

    /// Persist the record atomically.
    pub async fn save(&self, record: &SyncStateRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(record)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json).await?;
        fs::rename(&temp, &self.path).await?;

        debug!("Saved state record to {:?}", self.path);
        Ok(())
    }

    /// Remove the record entirely (used by tests and explicit resets).
    pub async fn clear(&self) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            fs::remove_file(&self.path).await?;
            info!("Cleared state record at {:?}", self.path);
        }
        Ok(())
    }
}
