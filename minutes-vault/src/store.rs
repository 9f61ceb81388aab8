//! Vault storage interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

/// Whether a write created a new file or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

/// One note as seen by a full vault listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    /// Vault-relative path
    pub path: String,
    /// Remote id parsed from the note header, if the file carries one
    pub remote_id: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Storage primitives the sync core needs from a vault.
///
/// Paths are vault-relative with `/` separators. Implementations must
/// serialize concurrent writes to the same path; everything else may
/// interleave freely.
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read(&self, path: &str) -> Result<String>;

    /// Write a note, creating parent folders as needed.
    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome>;

    /// Copy an existing note to a new path (used for backups).
    async fn copy(&self, path: &str, new_path: &str) -> Result<()>;

    async fn ensure_folder(&self, path: &str) -> Result<()>;

    /// Filesystem modification time, or `None` when the file is missing.
    async fn modified_at(&self, path: &str) -> Result<Option<DateTime<Utc>>>;

    /// Enumerate every note in the vault with its header tag.
    ///
    /// This is a full scan; callers are expected to cache the result for
    /// the duration of a run.
    async fn list_all(&self) -> Result<Vec<VaultEntry>>;
}
