//! Synchronization core for minutes
//!
//! This crate provides the engine that mirrors remote meeting documents
//! into a local note vault:
//! - Conflict detection and resolution
//! - Adaptive batch scheduling
//! - Transactional sync state with durable persistence
//! - Crash recovery via per-document checkpoints
//! - Run orchestration and progress reporting

pub mod conflict;
pub mod detector;
pub mod errors;
pub mod fingerprint;
pub mod orchestrator;
pub mod persistence;
pub mod progress;
pub mod recovery;
pub mod scheduler;
pub mod state;

pub use conflict::{
    ApplyOutcome, AutoResolve, Conflict, ConflictResolver, ConflictType, Resolution,
    ResolverConfig,
};
pub use detector::ConflictDetector;
pub use errors::{Result, SyncError};
pub use fingerprint::fingerprint;
pub use orchestrator::{SyncConfig, SyncOptions, SyncOrchestrator};
pub use persistence::{LoadOutcome, StatePersistence, STATE_VERSION};
pub use progress::{DocumentError, SyncPhase, SyncProgress, SyncResult, SyncTotals};
pub use recovery::{generate_run_id, RecoveryCheckpoint, RecoveryManager};
pub use scheduler::{AdaptiveBatcher, BatchConfig, BatchProcessor, BatchReport, BatchRecord};
pub use state::{FileMetadata, StateStore, SyncStateRecord};
