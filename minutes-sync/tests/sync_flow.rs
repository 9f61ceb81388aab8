//! End-to-end sync runs against a JSON export and a real vault directory

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, Semaphore};

use minutes_remote::{JsonExportSource, RawDocument, RemoteDocument, RemoteSource};
use minutes_sync::{
    AutoResolve, RecoveryCheckpoint, StatePersistence, StateStore, SyncConfig, SyncError,
    SyncOptions, SyncOrchestrator, SyncPhase, SyncTotals,
};
use minutes_vault::{FsVault, VaultStore};

struct Fixture {
    _dir: TempDir,
    export: PathBuf,
    vault_dir: PathBuf,
    store: Arc<Mutex<StateStore>>,
    orchestrator: SyncOrchestrator,
}

impl Fixture {
    async fn new(export_json: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("export.json");
        let vault_dir = dir.path().join("vault");
        tokio::fs::write(&export, export_json).await.unwrap();

        let vault = FsVault::open(&vault_dir).await.unwrap();
        let persistence = StatePersistence::new(dir.path().join("state.json"));
        let store = Arc::new(Mutex::new(
            StateStore::open(persistence, &vault).await.unwrap(),
        ));

        let orchestrator = SyncOrchestrator::new(
            Arc::new(JsonExportSource::new(&export)),
            Arc::new(vault),
            store.clone(),
            SyncConfig::default(),
        );

        Self {
            _dir: dir,
            export,
            vault_dir,
            store,
            orchestrator,
        }
    }

    /// A second vault handle over the same directory, for assertions.
    async fn vault(&self) -> FsVault {
        FsVault::open(&self.vault_dir).await.unwrap()
    }

    async fn rewrite_export(&self, export_json: &str) {
        tokio::fs::write(&self.export, export_json).await.unwrap();
    }
}

fn export(docs: &[(&str, &str, &str)]) -> String {
    let documents: Vec<serde_json::Value> = docs
        .iter()
        .map(|(id, title, created)| {
            serde_json::json!({
                "id": id,
                "title": title,
                "created_at": created,
                "sections": [{"heading": "Notes", "content": format!("Discussion for {id}.")}]
            })
        })
        .collect();
    serde_json::json!({ "version": 1, "documents": documents }).to_string()
}

#[tokio::test]
async fn test_full_sync_then_idempotent_rerun() {
    let fixture = Fixture::new(&export(&[
        ("mtg-1", "Kickoff", "2026-01-05T10:00:00Z"),
        ("mtg-2", "Design review", "2026-01-12T10:00:00Z"),
        ("mtg-3", "Retro", "2026-01-19T10:00:00Z"),
    ]))
    .await;

    let first = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(first.updated, 0);
    assert!(first.errors.is_empty());

    let vault = fixture.vault().await;
    let kickoff = vault.read("Kickoff.md").await.unwrap();
    assert!(kickoff.contains("minutes-id: mtg-1"));
    assert!(kickoff.contains("# Kickoff"));
    assert!(kickoff.contains("Discussion for mtg-1."));

    // A second run must change nothing.
    let second = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(vault.read("Kickoff.md").await.unwrap(), kickoff);
}

#[tokio::test]
async fn test_same_title_documents_get_distinct_files() {
    let fixture = Fixture::new(&export(&[
        ("mtg-a", "Weekly Sync", "2026-02-02T09:00:00Z"),
        ("mtg-b", "Weekly Sync", "2026-02-02T09:00:00Z"),
    ]))
    .await;

    let result = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.created, 2);

    let vault = fixture.vault().await;
    let first = vault.read("Weekly Sync.md").await.unwrap();
    let second = vault.read("Weekly Sync 1.md").await.unwrap();
    assert!(first.contains("minutes-id: mtg-a"));
    assert!(second.contains("minutes-id: mtg-b"));
    // Neither file absorbed the other's content.
    assert!(!first.contains("mtg-b"));
    assert!(!second.contains("mtg-a"));

    let rerun = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.skipped, 2);
}

#[tokio::test]
async fn test_deleted_note_is_not_recreated() {
    let fixture = Fixture::new(&export(&[
        ("mtg-1", "Kickoff", "2026-01-05T10:00:00Z"),
        ("mtg-2", "Retro", "2026-01-19T10:00:00Z"),
    ]))
    .await;
    fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();

    // The user deletes a note on purpose.
    {
        let mut store = fixture.store.lock().await;
        store.begin_transaction("user-delete").unwrap();
        store.mark_deleted("mtg-1");
        store.commit_transaction().await.unwrap();
    }
    tokio::fs::remove_file(fixture.vault_dir.join("Kickoff.md"))
        .await
        .unwrap();

    let result = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.created, 0);
    assert_eq!(result.skipped, 2);

    let vault = fixture.vault().await;
    assert!(!vault.exists("Kickoff.md").await.unwrap());
}

#[tokio::test]
async fn test_user_edit_is_kept_by_default() {
    let fixture = Fixture::new(&export(&[("mtg-1", "Standup", "2026-01-05T10:00:00Z")])).await;
    fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();

    // Edit after the sync so the mtime postdates it.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let vault = fixture.vault().await;
    let edited = "---\nminutes-id: mtg-1\n---\n\n# Standup\n\nMy own notes.\n";
    vault.write("Standup.md", edited).await.unwrap();

    let result = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.updated, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(vault.read("Standup.md").await.unwrap(), edited);

    // The refreshed fingerprint means the edit is no longer flagged.
    let rerun = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(rerun.skipped, 1);
}

#[tokio::test]
async fn test_backup_strategy_preserves_user_bytes() {
    let fixture = Fixture::new(&export(&[("mtg-1", "Planning", "2026-01-05T10:00:00Z")])).await;
    fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let vault = fixture.vault().await;
    let edited = "---\nminutes-id: mtg-1\n---\n\n# Planning\n\nHand-written agenda.\n";
    vault.write("Planning.md", edited).await.unwrap();

    let result = fixture
        .orchestrator
        .sync(SyncOptions {
            auto_resolve: Some(AutoResolve::Backup),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.updated, 1);

    // The note was overwritten with the remote render.
    let current = vault.read("Planning.md").await.unwrap();
    assert!(current.contains("Discussion for mtg-1."));
    assert!(!current.contains("Hand-written agenda."));

    // The backup holds the user's bytes exactly.
    let entries = vault.list_all().await.unwrap();
    let backup = entries
        .iter()
        .find(|e| e.path.contains(".sync-backup."))
        .expect("backup file created");
    assert_eq!(vault.read(&backup.path).await.unwrap(), edited);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let fixture = Fixture::new(&export(&[
        ("mtg-1", "Kickoff", "2026-01-05T10:00:00Z"),
        ("mtg-2", "Retro", "2026-01-19T10:00:00Z"),
    ]))
    .await;

    let dry = fixture
        .orchestrator
        .sync(SyncOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(dry.created, 2);

    let vault = fixture.vault().await;
    assert!(vault.list_all().await.unwrap().is_empty());
    assert!(fixture.store.lock().await.mapping().is_empty());

    // A real run afterwards still does the work.
    let real = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(real.created, 2);
}

#[tokio::test]
async fn test_recovery_resumes_past_processed_documents() {
    let fixture = Fixture::new(&export(&[
        ("mtg-1", "Kickoff", "2026-01-05T10:00:00Z"),
        ("mtg-2", "Design review", "2026-01-12T10:00:00Z"),
        ("mtg-3", "Retro", "2026-01-19T10:00:00Z"),
    ]))
    .await;

    // Simulate a run that died after the first document: its checkpoint
    // survived with one id processed and one create counted.
    {
        let mut checkpoint = RecoveryCheckpoint::new("sync_interrupted", 3);
        checkpoint.processed_ids.push("mtg-1".to_string());
        checkpoint.partial = SyncTotals {
            created: 1,
            ..Default::default()
        };
        fixture
            .store
            .lock()
            .await
            .save_checkpoint(Some(checkpoint))
            .await
            .unwrap();
    }

    let result = fixture
        .orchestrator
        .sync(SyncOptions {
            enable_recovery: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // One create carried over, two performed now; mtg-1 was not redone.
    assert_eq!(result.created, 3);
    let vault = fixture.vault().await;
    assert!(!vault.exists("Kickoff.md").await.unwrap());
    assert!(vault.exists("Design review.md").await.unwrap());
    assert!(vault.exists("Retro.md").await.unwrap());

    // Completion cleared the checkpoint.
    assert!(fixture.store.lock().await.checkpoint().is_none());
}

#[tokio::test]
async fn test_remote_update_propagates() {
    let fixture = Fixture::new(&export(&[("mtg-1", "Kickoff", "2026-01-05T10:00:00Z")])).await;
    fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();

    // The remote document gains content after the first sync.
    let now = chrono::Utc::now().to_rfc3339();
    fixture
        .rewrite_export(&serde_json::json!({
            "version": 1,
            "documents": [{
                "id": "mtg-1",
                "title": "Kickoff",
                "created_at": "2026-01-05T10:00:00Z",
                "updated_at": now,
                "sections": [{"heading": "Notes", "content": "Revised agenda."}]
            }]
        })
        .to_string())
        .await;

    let result = fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.created, 0);

    let vault = fixture.vault().await;
    assert!(vault.read("Kickoff.md").await.unwrap().contains("Revised agenda."));
}

/// Remote source whose fetch blocks until the test releases it, so a run
/// can be held mid-flight deterministically.
struct GatedSource {
    documents: Vec<RemoteDocument>,
    started: Arc<Semaphore>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl RemoteSource for GatedSource {
    async fn test_connection(&self) -> minutes_remote::Result<bool> {
        Ok(true)
    }

    async fn fetch_all(&self) -> minutes_remote::Result<Vec<RemoteDocument>> {
        self.started.add_permits(1);
        self.gate.acquire().await.unwrap().forget();
        Ok(self.documents.clone())
    }

    async fn fetch_since(&self, _since: DateTime<Utc>) -> minutes_remote::Result<Vec<RemoteDocument>> {
        self.fetch_all().await
    }
}

fn remote_doc(id: &str, title: &str) -> RemoteDocument {
    RemoteDocument::from_raw(RawDocument {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        created_at: Some("2026-01-05T10:00:00Z".parse().unwrap()),
        ..Default::default()
    })
    .unwrap()
}

async fn gated_orchestrator(
    dir: &TempDir,
    documents: Vec<RemoteDocument>,
) -> (
    Arc<SyncOrchestrator>,
    Arc<Mutex<StateStore>>,
    Arc<Semaphore>,
    Arc<Semaphore>,
) {
    let vault = FsVault::open(dir.path().join("vault")).await.unwrap();
    let persistence = StatePersistence::new(dir.path().join("state.json"));
    let store = Arc::new(Mutex::new(
        StateStore::open(persistence, &vault).await.unwrap(),
    ));
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::new(GatedSource {
            documents,
            started: started.clone(),
            gate: gate.clone(),
        }),
        Arc::new(vault),
        store.clone(),
        SyncConfig::default(),
    ));
    (orchestrator, store, started, gate)
}

#[tokio::test]
async fn test_second_sync_fails_fast_while_one_is_running() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store, started, gate) = gated_orchestrator(&dir, Vec::new()).await;

    let runner = orchestrator.clone();
    let first = tokio::spawn(async move { runner.sync(SyncOptions::default()).await });

    // Wait until the first run is inside its fetch, then try to start
    // another.
    started.acquire().await.unwrap().forget();
    let err = orchestrator.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Busy));

    gate.add_permits(1);
    first.await.unwrap().unwrap();

    // With the first run finished, a new one may start again.
    gate.add_permits(1);
    orchestrator.sync(SyncOptions::default()).await.unwrap();
}

#[tokio::test]
async fn test_cancel_rolls_back_and_reaches_cancelled_phase() {
    let dir = TempDir::new().unwrap();
    let documents = vec![
        remote_doc("mtg-1", "Kickoff"),
        remote_doc("mtg-2", "Retro"),
    ];
    let (orchestrator, store, started, gate) = gated_orchestrator(&dir, documents).await;

    let runner = orchestrator.clone();
    let run = tokio::spawn(async move { runner.sync(SyncOptions::default()).await });

    // Cancel while the run is held in its fetch; the cancellation is
    // honored at the next check, before any document is applied.
    started.acquire().await.unwrap().forget();
    orchestrator.cancel().await;
    gate.add_permits(1);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(orchestrator.progress().await.phase, SyncPhase::Cancelled);

    // Nothing reached the committed state or the vault.
    let store = store.lock().await;
    assert!(store.mapping().is_empty());
    assert!(store.last_sync().is_none());
    drop(store);
    let vault = FsVault::open(dir.path().join("vault")).await.unwrap();
    assert!(vault.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_incremental_fetch_skips_untouched_documents() {
    let fixture = Fixture::new(&export(&[("mtg-1", "Kickoff", "2026-01-05T10:00:00Z")])).await;
    fixture
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .unwrap();

    // A new document appears with a fresh timestamp; the old one is
    // filtered out server-side by the incremental fetch.
    let now = chrono::Utc::now().to_rfc3339();
    fixture
        .rewrite_export(&serde_json::json!({
            "version": 1,
            "documents": [
                {"id": "mtg-1", "title": "Kickoff", "created_at": "2026-01-05T10:00:00Z"},
                {"id": "mtg-2", "title": "Followup", "created_at": now}
            ]
        })
        .to_string())
        .await;

    let result = fixture
        .orchestrator
        .sync(SyncOptions {
            incremental: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(result.skipped, 0);

    let vault = fixture.vault().await;
    assert!(vault.exists("Followup.md").await.unwrap());
}
