//! Conflict taxonomy and resolution
//!
//! The detector classifies divergence between recorded state and reality;
//! the resolver maps each conflict to a concrete action and performs the
//! backups, merges and duplicate writes that action requires. Any I/O
//! failure here is a per-document error; it never aborts the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use minutes_remote::RemoteDocument;
use minutes_vault::note::{backup_path, numbered_variant, render_note, render_with_body, strip_header};
use minutes_vault::{VaultStore, WriteOutcome};

use crate::errors::Result;
use crate::fingerprint::fingerprint;

/// Opening line of the block a merge preserves the losing body in
pub const DISCARDED_BLOCK_START: &str = "<!-- minutes: discarded version (sync merge) -->";
/// Closing line of the discarded-version block
pub const DISCARDED_BLOCK_END: &str = "<!-- minutes: end discarded version -->";

/// Types of conflicts that can occur during sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// More than one local file claims the same remote id
    DuplicateId,
    /// A tagged local file exists but no metadata was recorded for it
    MetadataCorrupted,
    /// Metadata points at a path with no file behind it
    FileMissing,
    /// The file at the recorded path carries a different remote id
    PathConflict,
    /// Local was edited after the last sync; remote unchanged
    UserModified,
    /// Local was edited and the remote changed too
    BothModified,
}

/// Concrete action settling a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// No write; metadata is still refreshed so future runs don't re-flag
    KeepLocal,
    /// Overwrite with the remote render
    KeepRemote,
    /// Copy the existing file aside, then overwrite
    BackupThenUpdate,
    /// Keep the longer body, preserving the other in a delimited block.
    ///
    /// This is a conservative length heuristic, not a semantic merge; the
    /// losing body is kept verbatim precisely so the heuristic cannot
    /// lose data.
    Merge,
    /// Write the remote content to a new non-colliding path
    CreateDuplicate,
    /// No action, no metadata update
    Skip,
}

/// Global override a caller can apply across all conflict types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoResolve {
    Local,
    Remote,
    Backup,
}

/// A detected divergence for one remote document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub remote_id: String,
    pub local_path: Option<String>,
    pub remote_path: Option<String>,
    pub description: String,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
    /// Explicit per-conflict choice, set by a caller before apply
    pub resolution: Option<Resolution>,
}

/// What applying a resolution did
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub resolution: Resolution,
    /// Path that owns the remote id after the action, `None` for skips
    pub path: Option<String>,
    pub backup_path: Option<String>,
    /// Set when a write happened
    pub write: Option<WriteOutcome>,
    /// Fingerprint of the content now at `path`
    pub content_hash: Option<String>,
}

/// Configuration for the resolver's default suggestions
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Default for USER_MODIFIED; `KeepLocal` unless the user opted into
    /// backup-and-update behavior.
    pub user_modified: Resolution,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_modified: Resolution::KeepLocal,
        }
    }
}

/// Maps conflicts to resolutions and applies them
pub struct ConflictResolver {
    config: ResolverConfig,
}

impl ConflictResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Suggest a resolution for a conflict.
    ///
    /// Precedence: explicit per-conflict choice, then the global override,
    /// then the per-type default table.
    pub fn suggest(&self, conflict: &Conflict, global: Option<AutoResolve>) -> Resolution {
        if let Some(explicit) = conflict.resolution {
            return explicit;
        }
        if let Some(global) = global {
            return match global {
                AutoResolve::Local => Resolution::KeepLocal,
                AutoResolve::Remote => Resolution::KeepRemote,
                AutoResolve::Backup => Resolution::BackupThenUpdate,
            };
        }
        match conflict.conflict_type {
            ConflictType::UserModified => self.config.user_modified,
            ConflictType::BothModified => Resolution::BackupThenUpdate,
            ConflictType::FileMissing => Resolution::KeepRemote,
            ConflictType::DuplicateId | ConflictType::PathConflict => Resolution::CreateDuplicate,
            ConflictType::MetadataCorrupted => Resolution::KeepRemote,
        }
    }

    /// Apply a resolution for one document.
    ///
    /// `target_path` is where the document would normally live; conflicts
    /// carrying a recorded local path override it where that makes sense.
    pub async fn apply(
        &self,
        vault: &dyn VaultStore,
        conflict: &Conflict,
        resolution: Resolution,
        doc: &RemoteDocument,
        target_path: &str,
    ) -> Result<ApplyOutcome> {
        debug!(
            "Applying {:?} for {} ({:?})",
            resolution, conflict.remote_id, conflict.conflict_type
        );

        let path = conflict
            .local_path
            .clone()
            .unwrap_or_else(|| target_path.to_string());

        match resolution {
            Resolution::Skip => Ok(ApplyOutcome {
                resolution,
                path: None,
                backup_path: None,
                write: None,
                content_hash: None,
            }),

            Resolution::KeepLocal => {
                let current = vault.read(&path).await?;
                Ok(ApplyOutcome {
                    resolution,
                    path: Some(path),
                    backup_path: None,
                    write: None,
                    content_hash: Some(fingerprint(&current)),
                })
            }

            Resolution::KeepRemote => {
                let rendered = render_note(doc);
                let write = vault.write(&path, &rendered).await?;
                Ok(ApplyOutcome {
                    resolution,
                    path: Some(path),
                    backup_path: None,
                    write: Some(write),
                    content_hash: Some(fingerprint(&rendered)),
                })
            }

            Resolution::BackupThenUpdate => {
                let backup = self.backup(vault, &path).await?;
                let rendered = render_note(doc);
                let write = vault.write(&path, &rendered).await?;
                info!("Backed up {} to {} before update", path, backup);
                Ok(ApplyOutcome {
                    resolution,
                    path: Some(path),
                    backup_path: Some(backup),
                    write: Some(write),
                    content_hash: Some(fingerprint(&rendered)),
                })
            }

            Resolution::Merge => {
                let local = vault.read(&path).await?;
                let merged_body = merge_bodies(strip_header(&local), &doc.render_body());
                let merged = render_with_body(doc, &merged_body);
                let write = vault.write(&path, &merged).await?;
                Ok(ApplyOutcome {
                    resolution,
                    path: Some(path),
                    backup_path: None,
                    write: Some(write),
                    content_hash: Some(fingerprint(&merged)),
                })
            }

            Resolution::CreateDuplicate => {
                let fresh = self.non_colliding(vault, target_path).await?;
                let rendered = render_note(doc);
                let write = vault.write(&fresh, &rendered).await?;
                info!("Wrote duplicate for {} at {}", conflict.remote_id, fresh);
                Ok(ApplyOutcome {
                    resolution,
                    path: Some(fresh),
                    backup_path: None,
                    write: Some(write),
                    content_hash: Some(fingerprint(&rendered)),
                })
            }
        }
    }

    /// Copy a file to a timestamp-suffixed sibling that does not collide
    /// with anything already on disk.
    async fn backup(&self, vault: &dyn VaultStore, path: &str) -> Result<String> {
        let base = backup_path(path, Utc::now());
        let mut candidate = base.clone();
        let mut n = 1;
        while vault.exists(&candidate).await? {
            candidate = numbered_variant(&base, n);
            n += 1;
        }
        vault.copy(path, &candidate).await?;
        Ok(candidate)
    }

    async fn non_colliding(&self, vault: &dyn VaultStore, path: &str) -> Result<String> {
        if !vault.exists(path).await? {
            return Ok(path.to_string());
        }
        let mut n = 1;
        loop {
            let candidate = numbered_variant(path, n);
            if !vault.exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Keep the longer body; preserve the other verbatim in a delimited block
/// when both are non-empty and differ.
fn merge_bodies(local: &str, remote: &str) -> String {
    let (kept, other) = if local.len() >= remote.len() {
        (local, remote)
    } else {
        (remote, local)
    };

    if other.trim().is_empty() || kept.trim() == other.trim() {
        return kept.to_string();
    }

    format!(
        "{}\n\n{}\n{}\n{}\n",
        kept.trim_end(),
        DISCARDED_BLOCK_START,
        other.trim_end(),
        DISCARDED_BLOCK_END
    )
}
