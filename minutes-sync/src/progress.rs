//! Progress and result reporting for sync runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Phase of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Connecting,
    Fetching,
    Validating,
    DetectingConflicts,
    Resolving,
    Applying,
    Committing,
    Complete,
    Cancelled,
    Error,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Connecting => "connecting",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Validating => "validating",
            SyncPhase::DetectingConflicts => "detecting-conflicts",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Applying => "applying",
            SyncPhase::Committing => "committing",
            SyncPhase::Complete => "complete",
            SyncPhase::Cancelled => "cancelled",
            SyncPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// One per-document failure, recorded without aborting the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    pub remote_id: String,
    pub title: String,
    pub message: String,
}

/// Running counts accumulated while documents are processed.
///
/// Serialized into recovery checkpoints so an interrupted run resumes its
/// partial result instead of starting the counts over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTotals {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<DocumentError>,
}

impl SyncTotals {
    pub fn record_error(&mut self, remote_id: &str, title: &str, message: impl ToString) {
        self.errors.push(DocumentError {
            remote_id: remote_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped + self.errors.len()
    }
}

/// Final result of a sync run
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<DocumentError>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn from_totals(totals: SyncTotals, duration: Duration) -> Self {
        Self {
            created: totals.created,
            updated: totals.updated,
            skipped: totals.skipped,
            errors: totals.errors,
            duration,
        }
    }
}

/// Snapshot for polling callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub processed: usize,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub error_count: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            processed: 0,
            total: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            error_count: 0,
            started_at: None,
        }
    }
}

impl SyncProgress {
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f32 / self.total as f32) * 100.0
    }
}
