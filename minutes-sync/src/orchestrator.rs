//! Sync run orchestration
//!
//! One run walks a fixed sequence of phases: connect, fetch, validate,
//! detect conflicts, resolve, apply, commit. Only one run may be active
//! at a time; a second start fails fast instead of queueing. Per-document
//! failures are recorded and skipped over, run-level failures roll the
//! transaction back and propagate.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minutes_remote::{RemoteDocument, RemoteSource};
use minutes_vault::note::{note_path, numbered_variant, render_note};
use minutes_vault::{VaultStore, WriteOutcome};

use crate::conflict::{AutoResolve, ConflictResolver, Resolution, ResolverConfig};
use crate::detector::ConflictDetector;
use crate::errors::{Result, SyncError};
use crate::fingerprint::fingerprint;
use crate::progress::{SyncPhase, SyncProgress, SyncResult, SyncTotals};
use crate::recovery::{generate_run_id, RecoveryManager};
use crate::scheduler::{AdaptiveBatcher, BatchConfig, BatchProcessor};
use crate::state::{FileMetadata, StateStore};

/// Configuration for the orchestrator
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub batch: BatchConfig,
    pub resolver: ResolverConfig,
}

/// Per-run options
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Compute every action, apply none
    pub dry_run: bool,
    pub validate_data: bool,
    /// Global conflict strategy overriding the per-type defaults
    pub auto_resolve: Option<AutoResolve>,
    pub enable_recovery: bool,
    pub max_documents: Option<usize>,
    pub include_date_in_filename: bool,
    /// Fetch only documents updated since the last successful sync
    pub incremental: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            validate_data: true,
            auto_resolve: None,
            enable_recovery: false,
            max_documents: None,
            include_date_in_filename: false,
            incremental: false,
        }
    }
}

/// Composes fetch, detection, resolution, batching, state and recovery
/// into one run
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteSource>,
    vault: Arc<dyn VaultStore>,
    store: Arc<Mutex<StateStore>>,
    config: SyncConfig,
    progress: Arc<RwLock<SyncProgress>>,
    running: AtomicBool,
    cancel: RwLock<CancellationToken>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        vault: Arc<dyn VaultStore>,
        store: Arc<Mutex<StateStore>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            vault,
            store,
            config,
            progress: Arc::new(RwLock::new(SyncProgress::default())),
            running: AtomicBool::new(false),
            cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Request cooperative cancellation of the active run.
    ///
    /// Honored between documents and between batches; an in-flight write
    /// finishes first.
    pub async fn cancel(&self) {
        self.cancel.read().await.cancel();
    }

    /// Snapshot for polling callers.
    pub async fn progress(&self) -> SyncProgress {
        self.progress.read().await.clone()
    }

    /// Run one sync.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Busy);
        }

        let outcome = self.run(&options).await;

        let terminal = match &outcome {
            Ok(_) => SyncPhase::Complete,
            Err(SyncError::Cancelled) => SyncPhase::Cancelled,
            Err(_) => SyncPhase::Error,
        };
        self.set_phase(terminal).await;
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run(&self, options: &SyncOptions) -> Result<SyncResult> {
        let started = std::time::Instant::now();
        let cancel = CancellationToken::new();
        *self.cancel.write().await = cancel.clone();
        {
            let mut progress = self.progress.write().await;
            *progress = SyncProgress::default();
            progress.started_at = Some(Utc::now());
        }

        // Connect
        self.set_phase(SyncPhase::Connecting).await;
        if !self.remote.test_connection().await.map_err(SyncError::from)? {
            return Err(SyncError::Network("connection test failed".to_string()));
        }

        // Recovery offer
        let mut recovery = RecoveryManager::new(self.store.clone());
        let mut totals = SyncTotals::default();
        let mut already_processed: HashSet<String> = HashSet::new();
        if options.enable_recovery && !options.dry_run {
            if let Some(checkpoint) = recovery.check_recovery().await? {
                if recovery.attempt_recovery(checkpoint).await? {
                    already_processed = recovery.processed_ids();
                    totals = recovery.partial_totals();
                }
            }
        }

        // Fetch
        self.set_phase(SyncPhase::Fetching).await;
        let since = if options.incremental {
            self.store.lock().await.last_sync()
        } else {
            None
        };
        let mut documents = match since {
            Some(ts) => self.remote.fetch_since(ts).await.map_err(SyncError::from)?,
            None => self.remote.fetch_all().await.map_err(SyncError::from)?,
        };
        if let Some(max) = options.max_documents {
            documents.truncate(max);
        }
        info!("Fetched {} documents", documents.len());

        // Validate
        self.set_phase(SyncPhase::Validating).await;
        if options.validate_data {
            documents = validate_documents(documents, &mut totals);
        }

        let overall_total = documents.len();
        let work: Vec<RemoteDocument> = documents
            .into_iter()
            .filter(|d| !already_processed.contains(&d.id))
            .collect();
        if !already_processed.is_empty() {
            info!(
                "Resuming: {} documents already processed, {} remaining",
                already_processed.len(),
                work.len()
            );
        }

        // Open the transaction and track recovery for what follows.
        let run_id = if options.enable_recovery && !options.dry_run && !recovery.is_tracking() {
            recovery.start_tracking(overall_total).await?
        } else {
            generate_run_id()
        };
        self.store.lock().await.begin_transaction(run_id)?;

        let applied = self
            .apply_documents(options, &cancel, &work, overall_total, totals, recovery)
            .await;

        match applied {
            Ok(totals) => {
                let result = SyncResult::from_totals(totals, started.elapsed());
                info!(
                    "Sync complete: {} created, {} updated, {} skipped, {} errors in {:?}",
                    result.created,
                    result.updated,
                    result.skipped,
                    result.errors.len(),
                    result.duration
                );
                Ok(result)
            }
            Err(e) => {
                // Uncommitted metadata mutations are discarded; the
                // checkpoint slot on disk survives for the next run.
                let mut store = self.store.lock().await;
                if store.in_transaction() {
                    let _ = store.rollback_transaction();
                }
                Err(e)
            }
        }
    }

    /// Everything between transaction begin and commit.
    async fn apply_documents(
        &self,
        options: &SyncOptions,
        cancel: &CancellationToken,
        work: &[RemoteDocument],
        overall_total: usize,
        totals: SyncTotals,
        recovery: RecoveryManager,
    ) -> Result<SyncTotals> {
        // Detect against one cached vault listing per run.
        self.set_phase(SyncPhase::DetectingConflicts).await;
        let detector = ConflictDetector::new(self.vault.list_all().await.map_err(SyncError::from)?);

        self.set_phase(SyncPhase::Resolving).await;
        let mut processor = DocumentProcessor {
            vault: self.vault.clone(),
            store: self.store.clone(),
            resolver: ConflictResolver::new(self.config.resolver.clone()),
            detector,
            recovery,
            totals,
            options: options.clone(),
            cancel: cancel.clone(),
            progress: self.progress.clone(),
            overall_total,
        };

        self.set_phase(SyncPhase::Applying).await;
        let mut batcher = AdaptiveBatcher::new(self.config.batch.clone());
        let report = match batcher
            .process_batches(work, &mut processor, cancel, |_, _| {})
            .await
        {
            Ok(report) => report,
            Err(e) => {
                let DocumentProcessor { mut recovery, .. } = processor;
                recovery.handle_failure(&e).await;
                return Err(e);
            }
        };

        let DocumentProcessor {
            mut totals,
            mut recovery,
            ..
        } = processor;

        for index in report.abandoned {
            let doc = &work[index];
            totals.record_error(&doc.id, &doc.title, "abandoned after repeated batch failures");
        }

        // Commit
        self.set_phase(SyncPhase::Committing).await;
        let error_ids: HashSet<String> =
            totals.errors.iter().map(|e| e.remote_id.clone()).collect();
        let mapped_paths: Vec<String> = {
            let store = self.store.lock().await;
            store.mapping().values().map(|m| m.path.clone()).collect()
        };
        let mut existing = HashSet::new();
        for path in mapped_paths {
            if self.vault.exists(&path).await.map_err(SyncError::from)? {
                existing.insert(path);
            }
        }

        let mut store = self.store.lock().await;
        if options.dry_run {
            store.rollback_transaction()?;
            debug!("Dry run: transaction discarded");
        } else {
            store.cleanup_orphans(&existing, &error_ids);
            store.set_last_sync(Utc::now());
            store.commit_transaction().await?;
            drop(store);
            recovery.complete_recovery().await?;
        }

        Ok(totals)
    }

    async fn set_phase(&self, phase: SyncPhase) {
        self.progress.write().await.phase = phase;
    }
}

/// Drop malformed or duplicated payload entries, recording each as a
/// per-document error.
fn validate_documents(documents: Vec<RemoteDocument>, totals: &mut SyncTotals) -> Vec<RemoteDocument> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(documents.len());

    for doc in documents {
        if !seen.insert(doc.id.clone()) {
            totals.record_error(&doc.id, &doc.title, "duplicate id in remote payload");
            continue;
        }
        if doc.updated_at < doc.created_at {
            warn!("Document {} has updated_at before created_at", doc.id);
        }
        kept.push(doc);
    }
    kept
}

/// What processing one document did
enum DocOutcome {
    Created,
    Updated,
    Skipped,
}

struct DocumentProcessor {
    vault: Arc<dyn VaultStore>,
    store: Arc<Mutex<StateStore>>,
    resolver: ConflictResolver,
    detector: ConflictDetector,
    recovery: RecoveryManager,
    totals: SyncTotals,
    options: SyncOptions,
    cancel: CancellationToken,
    progress: Arc<RwLock<SyncProgress>>,
    overall_total: usize,
}

#[async_trait]
impl BatchProcessor<RemoteDocument> for DocumentProcessor {
    async fn process(&mut self, batch: &[RemoteDocument]) -> Result<()> {
        for doc in batch {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self.process_one(doc).await {
                Ok(DocOutcome::Created) => self.totals.created += 1,
                Ok(DocOutcome::Updated) => self.totals.updated += 1,
                Ok(DocOutcome::Skipped) => self.totals.skipped += 1,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Failed to sync {} ({}): {}", doc.id, doc.title, e);
                    self.totals.record_error(&doc.id, &doc.title, e);
                }
            }

            // A checkpoint that fails to persist costs resumability, not
            // the run; the documents themselves were already applied.
            if !self.options.dry_run {
                if let Err(e) = self.recovery.update_progress(&doc.id, &self.totals).await {
                    warn!("Failed to persist checkpoint after {}: {}", doc.id, e);
                }
            }
            self.publish_progress().await;
        }
        Ok(())
    }
}

impl DocumentProcessor {
    async fn process_one(&mut self, doc: &RemoteDocument) -> Result<DocOutcome> {
        let metadata = {
            let store = self.store.lock().await;
            if store.is_deleted(&doc.id) {
                debug!("Skipping {}: locally deleted", doc.id);
                return Ok(DocOutcome::Skipped);
            }
            store.get(&doc.id).cloned()
        };

        let target = note_path(doc, self.options.include_date_in_filename);
        let conflicts = self
            .detector
            .detect(
                self.vault.as_ref(),
                &doc.id,
                &target,
                doc.updated_at,
                metadata.as_ref(),
            )
            .await?;

        if let Some(conflict) = conflicts.first() {
            let resolution = self.resolver.suggest(conflict, self.options.auto_resolve);
            debug!(
                "Conflict {:?} for {}: resolving with {:?}",
                conflict.conflict_type, doc.id, resolution
            );

            if self.options.dry_run {
                return Ok(dry_run_outcome(resolution, metadata.is_some()));
            }

            let outcome = self
                .resolver
                .apply(self.vault.as_ref(), conflict, resolution, doc, &target)
                .await?;

            let Some(path) = outcome.path else {
                return Ok(DocOutcome::Skipped);
            };
            self.record_metadata(doc, &path, outcome.content_hash, metadata.as_ref())
                .await?;

            return Ok(match outcome.write {
                Some(WriteOutcome::Created) => DocOutcome::Created,
                Some(WriteOutcome::Updated) => DocOutcome::Updated,
                None => DocOutcome::Skipped,
            });
        }

        match metadata {
            // Known document; detection found it clean. Rewrite only when
            // the remote actually changed since the last sync: the local
            // content may be a kept user edit that a plain hash comparison
            // would wrongly overwrite.
            Some(meta) => {
                let rendered = render_note(doc);
                if fingerprint(&rendered) == meta.content_hash
                    || doc.updated_at <= meta.last_synced_at
                {
                    return Ok(DocOutcome::Skipped);
                }
                if self.options.dry_run {
                    return Ok(DocOutcome::Updated);
                }
                self.vault.write(&meta.path, &rendered).await?;
                self.record_metadata(doc, &meta.path, Some(fingerprint(&rendered)), Some(&meta))
                    .await?;
                Ok(DocOutcome::Updated)
            }
            // Brand new document.
            None => {
                if self.options.dry_run {
                    return Ok(DocOutcome::Created);
                }
                let path = self.fresh_path(&target).await?;
                let rendered = render_note(doc);
                self.vault.write(&path, &rendered).await?;
                self.record_metadata(doc, &path, Some(fingerprint(&rendered)), None)
                    .await?;
                Ok(DocOutcome::Created)
            }
        }
    }

    /// First non-colliding variant of the preferred path.
    async fn fresh_path(&self, preferred: &str) -> Result<String> {
        if !self.vault.exists(preferred).await? {
            return Ok(preferred.to_string());
        }
        let mut n = 1;
        loop {
            let candidate = numbered_variant(preferred, n);
            if !self.vault.exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    async fn record_metadata(
        &mut self,
        doc: &RemoteDocument,
        path: &str,
        content_hash: Option<String>,
        previous: Option<&FileMetadata>,
    ) -> Result<()> {
        let modified_at = self
            .vault
            .modified_at(path)
            .await?
            .unwrap_or_else(Utc::now);
        let sync_version = previous.map(|m| m.sync_version + 1).unwrap_or(1);

        self.store.lock().await.add_or_update(FileMetadata {
            remote_id: doc.id.clone(),
            path: path.to_string(),
            content_hash: content_hash.unwrap_or_default(),
            last_modified_at: modified_at,
            last_synced_at: Utc::now(),
            sync_version,
        });
        self.detector.note_written(path, &doc.id);
        Ok(())
    }

    async fn publish_progress(&self) {
        let mut progress = self.progress.write().await;
        progress.total = self.overall_total;
        progress.processed = self.totals.processed();
        progress.created = self.totals.created;
        progress.updated = self.totals.updated;
        progress.skipped = self.totals.skipped;
        progress.error_count = self.totals.errors.len();
    }
}

/// Counts a resolution would produce, for dry runs.
fn dry_run_outcome(resolution: Resolution, had_metadata: bool) -> DocOutcome {
    match resolution {
        Resolution::Skip | Resolution::KeepLocal => DocOutcome::Skipped,
        Resolution::CreateDuplicate => DocOutcome::Created,
        Resolution::KeepRemote if !had_metadata => DocOutcome::Created,
        Resolution::KeepRemote | Resolution::BackupThenUpdate | Resolution::Merge => {
            DocOutcome::Updated
        }
    }
}
