//! Conflict detection
//!
//! Classifies the relationship between a remote document and previously
//! recorded local metadata. Detection is a read-only scan; the vault
//! listing it needs for duplicate-id matching is captured once per run
//! and invalidated only by writes the orchestrator itself performs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use minutes_vault::{VaultEntry, VaultStore};

use crate::conflict::{Conflict, ConflictType};
use crate::errors::Result;
use crate::fingerprint::fingerprint;
use crate::state::FileMetadata;

/// Detector over a cached snapshot of the vault
pub struct ConflictDetector {
    by_path: HashMap<String, VaultEntry>,
    by_remote_id: HashMap<String, Vec<String>>,
}

impl ConflictDetector {
    /// Build a detector from a full vault listing.
    pub fn new(entries: Vec<VaultEntry>) -> Self {
        let mut by_path = HashMap::with_capacity(entries.len());
        let mut by_remote_id: HashMap<String, Vec<String>> = HashMap::new();
        for entry in entries {
            if let Some(id) = &entry.remote_id {
                by_remote_id.entry(id.clone()).or_default().push(entry.path.clone());
            }
            by_path.insert(entry.path.clone(), entry);
        }
        debug!(
            "Conflict detector cached {} notes ({} tagged)",
            by_path.len(),
            by_remote_id.values().map(Vec::len).sum::<usize>()
        );
        Self { by_path, by_remote_id }
    }

    /// Record a write the orchestrator just performed, keeping the cached
    /// snapshot truthful without a rescan.
    pub fn note_written(&mut self, path: &str, remote_id: &str) {
        if let Some(previous) = self.by_path.get(path).and_then(|e| e.remote_id.clone()) {
            if let Some(paths) = self.by_remote_id.get_mut(&previous) {
                paths.retain(|p| p != path);
            }
        }
        let entry = VaultEntry {
            path: path.to_string(),
            remote_id: Some(remote_id.to_string()),
            modified_at: Utc::now(),
        };
        let paths = self.by_remote_id.entry(remote_id.to_string()).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
        self.by_path.insert(path.to_string(), entry);
    }

    /// Classify one remote document against recorded metadata.
    ///
    /// Returns at most one conflict; the taxonomy is evaluated in strict
    /// precedence order and the first match wins.
    pub async fn detect(
        &self,
        vault: &dyn VaultStore,
        remote_id: &str,
        remote_path: &str,
        remote_modified_at: DateTime<Utc>,
        metadata: Option<&FileMetadata>,
    ) -> Result<Vec<Conflict>> {
        let Some(metadata) = metadata else {
            // Nothing recorded for this id. Local files already tagged
            // with it mean state was lost or duplicated.
            let tagged = self.by_remote_id.get(remote_id).map(Vec::as_slice).unwrap_or(&[]);
            return Ok(match tagged {
                [] => Vec::new(),
                [only] => vec![self.conflict(
                    ConflictType::MetadataCorrupted,
                    remote_id,
                    Some(only.clone()),
                    remote_path,
                    remote_modified_at,
                    format!("{only} is tagged {remote_id} but no metadata was recorded"),
                )],
                many => vec![self.conflict(
                    ConflictType::DuplicateId,
                    remote_id,
                    Some(many[0].clone()),
                    remote_path,
                    remote_modified_at,
                    format!("{} local files are tagged {remote_id}", many.len()),
                )],
            });
        };

        let Some(entry) = self.by_path.get(&metadata.path) else {
            return Ok(vec![self.conflict(
                ConflictType::FileMissing,
                remote_id,
                Some(metadata.path.clone()),
                remote_path,
                remote_modified_at,
                format!("recorded file {} no longer exists", metadata.path),
            )]);
        };

        if entry.remote_id.as_deref() != Some(remote_id) {
            return Ok(vec![self.conflict(
                ConflictType::PathConflict,
                remote_id,
                Some(metadata.path.clone()),
                remote_path,
                remote_modified_at,
                format!(
                    "{} is tagged {:?}, expected {remote_id}",
                    metadata.path, entry.remote_id
                ),
            )]);
        }

        let current = vault.read(&metadata.path).await?;
        let edited = fingerprint(&current) != metadata.content_hash
            && entry.modified_at > metadata.last_synced_at;

        if edited {
            let conflict_type = if remote_modified_at > metadata.last_synced_at {
                ConflictType::BothModified
            } else {
                ConflictType::UserModified
            };
            let mut conflict = self.conflict(
                conflict_type,
                remote_id,
                Some(metadata.path.clone()),
                remote_path,
                remote_modified_at,
                format!("{} was edited after the last sync", metadata.path),
            );
            conflict.local_modified_at = Some(entry.modified_at);
            return Ok(vec![conflict]);
        }

        Ok(Vec::new())
    }

    fn conflict(
        &self,
        conflict_type: ConflictType,
        remote_id: &str,
        local_path: Option<String>,
        remote_path: &str,
        remote_modified_at: DateTime<Utc>,
        description: String,
    ) -> Conflict {
        Conflict {
            conflict_type,
            remote_id: remote_id.to_string(),
            local_path,
            remote_path: Some(remote_path.to_string()),
            description,
            local_modified_at: None,
            remote_modified_at: Some(remote_modified_at),
            resolution: None,
        }
    }
}
