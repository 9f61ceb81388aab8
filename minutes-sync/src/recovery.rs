//! Crash recovery for interrupted sync runs
//!
//! A run that opts into recovery keeps a single checkpoint slot in the
//! persisted state record, overwritten after every processed document, so
//! an interruption leaves at most one document's work ambiguous. The next
//! startup surfaces the checkpoint; resuming skips the ids already
//! processed and continues the partial result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};
use crate::progress::{SyncPhase, SyncTotals};
use crate::state::StateStore;

/// Checkpoints older than this are discarded instead of offered
const MAX_CHECKPOINT_AGE_HOURS: i64 = 24;

/// Durable progress marker for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    pub id: String,
    pub phase: SyncPhase,
    pub processed_ids: Vec<String>,
    pub total: usize,
    /// Partial result accumulated so far
    pub partial: SyncTotals,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecoveryCheckpoint {
    pub fn new(run_id: impl Into<String>, total: usize) -> Self {
        let now = Utc::now();
        Self {
            id: run_id.into(),
            phase: SyncPhase::Applying,
            processed_ids: Vec::new(),
            total,
            partial: SyncTotals::default(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed_ids.len()
    }

    pub fn is_stale(&self) -> bool {
        Utc::now().signed_duration_since(self.started_at)
            > Duration::hours(MAX_CHECKPOINT_AGE_HOURS)
    }

    /// Whether resuming this checkpoint can still save work.
    pub fn is_resumable(&self) -> bool {
        !self.is_stale() && self.processed() < self.total
    }
}

/// Tracks checkpoints for the orchestrator
pub struct RecoveryManager {
    store: Arc<Mutex<StateStore>>,
    active: Option<RecoveryCheckpoint>,
}

impl RecoveryManager {
    pub fn new(store: Arc<Mutex<StateStore>>) -> Self {
        Self {
            store,
            active: None,
        }
    }

    /// Look for a checkpoint left by an interrupted run.
    ///
    /// Stale checkpoints are cleared rather than offered.
    pub async fn check_recovery(&self) -> Result<Option<RecoveryCheckpoint>> {
        let mut store = self.store.lock().await;
        let Some(checkpoint) = store.checkpoint().cloned() else {
            return Ok(None);
        };
        if checkpoint.is_stale() {
            warn!(
                "Discarding stale checkpoint {} (started {})",
                checkpoint.id, checkpoint.started_at
            );
            store.save_checkpoint(None).await?;
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// Begin tracking a fresh run of `total` documents.
    pub async fn start_tracking(&mut self, total: usize) -> Result<String> {
        let run_id = generate_run_id();
        let checkpoint = RecoveryCheckpoint::new(run_id.clone(), total);
        self.store
            .lock()
            .await
            .save_checkpoint(Some(checkpoint.clone()))
            .await?;
        self.active = Some(checkpoint);
        debug!("Recovery tracking started for run {}", run_id);
        Ok(run_id)
    }

    /// Adopt an interrupted run's checkpoint.
    ///
    /// Returns false (and clears the slot) when the checkpoint is no
    /// longer worth resuming.
    pub async fn attempt_recovery(&mut self, checkpoint: RecoveryCheckpoint) -> Result<bool> {
        if !checkpoint.is_resumable() {
            info!("Checkpoint {} not resumable; clearing", checkpoint.id);
            self.store.lock().await.save_checkpoint(None).await?;
            return Ok(false);
        }
        info!(
            "Resuming run {}: {}/{} documents already processed",
            checkpoint.id,
            checkpoint.processed(),
            checkpoint.total
        );
        self.active = Some(checkpoint);
        Ok(true)
    }

    /// Ids already handled by the run being resumed.
    pub fn processed_ids(&self) -> HashSet<String> {
        self.active
            .as_ref()
            .map(|c| c.processed_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Partial totals carried over from the interrupted run.
    pub fn partial_totals(&self) -> SyncTotals {
        self.active
            .as_ref()
            .map(|c| c.partial.clone())
            .unwrap_or_default()
    }

    /// Overwrite the checkpoint slot after one processed document.
    pub async fn update_progress(&mut self, last_id: &str, totals: &SyncTotals) -> Result<()> {
        let Some(checkpoint) = self.active.as_mut() else {
            return Ok(());
        };
        checkpoint.processed_ids.push(last_id.to_string());
        checkpoint.partial = totals.clone();
        checkpoint.updated_at = Utc::now();
        self.store
            .lock()
            .await
            .save_checkpoint(Some(checkpoint.clone()))
            .await
    }

    /// Clear the checkpoint after a successful run.
    pub async fn complete_recovery(&mut self) -> Result<()> {
        if let Some(checkpoint) = self.active.take() {
            debug!("Run {} complete; clearing checkpoint", checkpoint.id);
        }
        self.store.lock().await.save_checkpoint(None).await
    }

    /// Keep the checkpoint after a failed run so the next startup can
    /// offer resumption again.
    pub async fn handle_failure(&mut self, error: &SyncError) {
        if let Some(checkpoint) = &self.active {
            warn!(
                "Run {} failed after {}/{} documents ({}); checkpoint preserved",
                checkpoint.id,
                checkpoint.processed(),
                checkpoint.total,
                error
            );
        }
        // The slot already holds the latest progress; nothing to write.
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }
}

/// Run id: millisecond timestamp plus a random suffix.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let random: u32 = rand::random();
    format!("sync_{}_{:08x}", timestamp, random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StatePersistence;
    use minutes_vault::FsVault;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> Arc<Mutex<StateStore>> {
        let vault = FsVault::open(dir.path().join("vault")).await.unwrap();
        let persistence = StatePersistence::new(dir.path().join("state.json"));
        Arc::new(Mutex::new(
            StateStore::open(persistence, &vault).await.unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_tracking_and_completion() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut manager = RecoveryManager::new(store.clone());

        manager.start_tracking(3).await.unwrap();
        let mut totals = SyncTotals::default();
        totals.created = 1;
        manager.update_progress("mtg-1", &totals).await.unwrap();

        let found = manager.check_recovery().await.unwrap().unwrap();
        assert_eq!(found.processed(), 1);
        assert_eq!(found.partial.created, 1);

        manager.complete_recovery().await.unwrap();
        assert!(manager.check_recovery().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_preserves_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut manager = RecoveryManager::new(store.clone());

        manager.start_tracking(5).await.unwrap();
        manager
            .update_progress("mtg-1", &SyncTotals::default())
            .await
            .unwrap();
        manager
            .handle_failure(&SyncError::Network("boom".to_string()))
            .await;

        let found = manager.check_recovery().await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().processed_ids, vec!["mtg-1".to_string()]);
    }

    #[tokio::test]
    async fn test_attempt_recovery_adopts_processed_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut manager = RecoveryManager::new(store.clone());

        let mut checkpoint = RecoveryCheckpoint::new("sync_test", 4);
        checkpoint.processed_ids = vec!["a".to_string(), "b".to_string()];
        assert!(manager.attempt_recovery(checkpoint).await.unwrap());

        let ids = manager.processed_ids();
        assert!(ids.contains("a") && ids.contains("b"));
    }

    #[tokio::test]
    async fn test_finished_checkpoint_not_resumed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut manager = RecoveryManager::new(store.clone());

        let mut checkpoint = RecoveryCheckpoint::new("sync_done", 2);
        checkpoint.processed_ids = vec!["a".to_string(), "b".to_string()];
        assert!(!manager.attempt_recovery(checkpoint).await.unwrap());
        assert!(!manager.is_tracking());
    }

    #[tokio::test]
    async fn test_stale_checkpoint_cleared_on_check() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let mut checkpoint = RecoveryCheckpoint::new("sync_old", 10);
        checkpoint.started_at = Utc::now() - Duration::hours(48);
        store
            .lock()
            .await
            .save_checkpoint(Some(checkpoint))
            .await
            .unwrap();

        let manager = RecoveryManager::new(store.clone());
        assert!(manager.check_recovery().await.unwrap().is_none());
        assert!(store.lock().await.checkpoint().is_none());
    }
}
