//! File-backed remote source reading a JSON export
//!
//! The export is a single versioned JSON object holding raw documents.
//! Malformed records surface as validation errors when validation is
//! strict, or are skipped with a warning otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::document::{RawDocument, RemoteDocument};
use crate::errors::{RemoteError, Result};
use crate::source::RemoteSource;

const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ExportFile {
    version: u32,
    #[serde(default)]
    documents: Vec<RawDocument>,
}

/// Remote source backed by a JSON export file
pub struct JsonExportSource {
    path: PathBuf,
    /// When false, records that fail validation are skipped instead of
    /// failing the whole fetch.
    strict: bool,
}

impl JsonExportSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            strict: true,
        }
    }

    pub fn lenient(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            strict: false,
        }
    }

    async fn load(&self) -> Result<Vec<RemoteDocument>> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        let export: ExportFile = serde_json::from_str(&data)?;

        if export.version > EXPORT_VERSION {
            return Err(RemoteError::UnsupportedVersion(export.version));
        }

        let mut documents = Vec::with_capacity(export.documents.len());
        for raw in export.documents {
            match RemoteDocument::from_raw(raw) {
                Ok(doc) => documents.push(doc),
                Err(e) if self.strict => return Err(e),
                Err(e) => warn!("Skipping invalid export record: {}", e),
            }
        }

        // Exports are not guaranteed to be ordered; the sync core expects
        // stable creation order.
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        debug!("Loaded {} documents from {:?}", documents.len(), self.path);
        Ok(documents)
    }
}

#[async_trait]
impl RemoteSource for JsonExportSource {
    async fn test_connection(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.path).await.unwrap_or(false))
    }

    async fn fetch_all(&self) -> Result<Vec<RemoteDocument>> {
        self.load().await
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteDocument>> {
        let documents = self.load().await?;
        Ok(documents
            .into_iter()
            .filter(|d| d.updated_at >= since)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_export(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("export.json");
        tokio::fs::write(&path, json).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_fetch_all_sorted_by_creation() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            r#"{
                "version": 1,
                "documents": [
                    {"id": "b", "title": "Later", "created_at": "2026-02-01T10:00:00Z"},
                    {"id": "a", "title": "Earlier", "created_at": "2026-01-01T10:00:00Z"}
                ]
            }"#,
        )
        .await;

        let source = JsonExportSource::new(&path);
        assert!(source.test_connection().await.unwrap());

        let docs = source.fetch_all().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[1].id, "b");
    }

    #[tokio::test]
    async fn test_strict_fails_on_invalid_record() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            r#"{"version": 1, "documents": [{"title": "No id", "created_at": "2026-01-01T10:00:00Z"}]}"#,
        )
        .await;

        let err = JsonExportSource::new(&path).fetch_all().await.unwrap_err();
        assert!(matches!(err, RemoteError::Validation { .. }));

        let docs = JsonExportSource::lenient(&path).fetch_all().await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_since_filters() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            r#"{
                "version": 1,
                "documents": [
                    {"id": "old", "title": "Old", "created_at": "2026-01-01T10:00:00Z"},
                    {"id": "new", "title": "New", "created_at": "2026-03-01T10:00:00Z"}
                ]
            }"#,
        )
        .await;

        let since = "2026-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let docs = JsonExportSource::new(&path).fetch_since(since).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "new");
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let path = write_export(&dir, r#"{"version": 99, "documents": []}"#).await;
        let err = JsonExportSource::new(&path).fetch_all().await.unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedVersion(99)));
    }
}
