//! Transactional sync state
//!
//! The state store is the authoritative mapping from remote id to local
//! file metadata, plus the set of ids the user deleted locally. Mutations
//! between `begin_transaction` and `commit_transaction` live only in
//! memory; commit persists them, rollback restores the last committed
//! view. Rollback does not undo filesystem writes that already happened;
//! those surface as per-document errors instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use minutes_vault::VaultStore;

use crate::errors::{Result, SyncError};
use crate::fingerprint::fingerprint;
use crate::persistence::{LoadOutcome, StatePersistence, STATE_VERSION};
use crate::recovery::RecoveryCheckpoint;

/// Metadata recorded for one synced file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub remote_id: String,
    /// Vault-relative path; exactly one path per remote id at any time
    pub path: String,
    /// Fingerprint of the last-written body
    pub content_hash: String,
    /// Filesystem mtime observed at the last sync
    pub last_modified_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub sync_version: u64,
}

/// The single persisted record for a vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStateRecord {
    pub version: u32,
    pub mapping: HashMap<String, FileMetadata>,
    /// Remote ids the user intentionally removed locally; suppresses
    /// recreation. Never overlaps the mapping.
    pub deleted_ids: HashSet<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub checkpoint: Option<RecoveryCheckpoint>,
}

impl Default for SyncStateRecord {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            mapping: HashMap::new(),
            deleted_ids: HashSet::new(),
            last_sync: None,
            checkpoint: None,
        }
    }
}

/// Transactional store over the persisted record
pub struct StateStore {
    persistence: StatePersistence,
    /// Live view, including uncommitted mutations
    working: SyncStateRecord,
    /// Last durable view; rollback target
    committed: SyncStateRecord,
    open_txn: Option<String>,
}

impl StateStore {
    /// Load the store, rebuilding from the vault when the persisted
    /// record is missing, unreadable, or from an unknown version.
    pub async fn open(persistence: StatePersistence, vault: &dyn VaultStore) -> Result<Self> {
        let record = match persistence.load().await? {
            LoadOutcome::Loaded(record) => record,
            LoadOutcome::Rebuild { reason } => {
                info!("Rebuilding sync state from vault: {}", reason);
                let record = Self::rebuild(vault).await?;
                persistence.save(&record).await?;
                record
            }
        };

        Ok(Self {
            persistence,
            committed: record.clone(),
            working: record,
            open_txn: None,
        })
    }

    /// Best-effort reconstruction from tagged vault files.
    async fn rebuild(vault: &dyn VaultStore) -> Result<SyncStateRecord> {
        let mut record = SyncStateRecord::default();
        for entry in vault.list_all().await? {
            let Some(remote_id) = entry.remote_id else {
                continue;
            };
            if record.mapping.contains_key(&remote_id) {
                warn!(
                    "Rebuild found a second file tagged {}: {} (keeping the first)",
                    remote_id, entry.path
                );
                continue;
            }
            let content = vault.read(&entry.path).await?;
            record.mapping.insert(
                remote_id.clone(),
                FileMetadata {
                    remote_id,
                    path: entry.path,
                    content_hash: fingerprint(&content),
                    last_modified_at: entry.modified_at,
                    last_synced_at: entry.modified_at,
                    sync_version: 1,
                },
            );
        }
        info!("Rebuilt state for {} notes", record.mapping.len());
        Ok(record)
    }

    pub fn begin_transaction(&mut self, id: impl Into<String>) -> Result<()> {
        if let Some(open) = &self.open_txn {
            return Err(SyncError::TransactionOpen(open.clone()));
        }
        let id = id.into();
        debug!("Transaction {} opened", id);
        self.open_txn = Some(id);
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> Result<()> {
        let id = self.open_txn.take().ok_or(SyncError::NoTransaction)?;
        self.committed = self.working.clone();
        self.persistence.save(&self.committed).await?;
        info!(
            "Transaction {} committed ({} mapped)",
            id,
            self.committed.mapping.len()
        );
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        let id = self.open_txn.take().ok_or(SyncError::NoTransaction)?;
        self.working = self.committed.clone();
        warn!("Transaction {} rolled back", id);
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.open_txn.is_some()
    }

    /// Record or refresh the metadata for a remote id.
    ///
    /// Keeps the one-path-per-id invariant in both directions: any other
    /// id previously claiming this path loses it.
    pub fn add_or_update(&mut self, metadata: FileMetadata) {
        let stale: Vec<String> = self
            .working
            .mapping
            .iter()
            .filter(|(id, m)| m.path == metadata.path && **id != metadata.remote_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            warn!("Path {} reassigned from {} to {}", metadata.path, id, metadata.remote_id);
            self.working.mapping.remove(&id);
        }

        self.working.deleted_ids.remove(&metadata.remote_id);
        self.working
            .mapping
            .insert(metadata.remote_id.clone(), metadata);
    }

    pub fn get(&self, remote_id: &str) -> Option<&FileMetadata> {
        self.working.mapping.get(remote_id)
    }

    pub fn mapping(&self) -> &HashMap<String, FileMetadata> {
        &self.working.mapping
    }

    pub fn is_deleted(&self, remote_id: &str) -> bool {
        self.working.deleted_ids.contains(remote_id)
    }

    /// Record that the user deleted this note on purpose; future runs
    /// must not recreate it.
    pub fn mark_deleted(&mut self, remote_id: &str) {
        self.working.mapping.remove(remote_id);
        self.working.deleted_ids.insert(remote_id.to_string());
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.working.last_sync
    }

    pub fn set_last_sync(&mut self, at: DateTime<Utc>) {
        self.working.last_sync = Some(at);
    }

    /// Drop metadata entries whose path no longer exists.
    ///
    /// Run after conflict resolution so transient FILE_MISSING states get
    /// their chance to be recreated first; ids with conflicts still
    /// pending are never removed.
    pub fn cleanup_orphans(
        &mut self,
        existing_paths: &HashSet<String>,
        pending_conflicts: &HashSet<String>,
    ) -> usize {
        let orphaned: Vec<String> = self
            .working
            .mapping
            .iter()
            .filter(|(id, m)| {
                !existing_paths.contains(&m.path) && !pending_conflicts.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &orphaned {
            debug!("Removing orphaned metadata for {}", id);
            self.working.mapping.remove(id);
        }
        if !orphaned.is_empty() {
            info!("Orphan cleanup removed {} entries", orphaned.len());
        }
        orphaned.len()
    }

    pub fn checkpoint(&self) -> Option<&RecoveryCheckpoint> {
        self.committed.checkpoint.as_ref()
    }

    /// Persist a checkpoint (or clear it) without touching uncommitted
    /// mapping mutations: only the last committed view plus the new
    /// checkpoint reaches disk.
    pub async fn save_checkpoint(&mut self, checkpoint: Option<RecoveryCheckpoint>) -> Result<()> {
        self.committed.checkpoint = checkpoint.clone();
        self.working.checkpoint = checkpoint;
        self.persistence.save(&self.committed).await
    }
}
