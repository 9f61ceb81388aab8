//! Filesystem vault implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{Result, VaultError};
use crate::locks::PathLocks;
use crate::note::parse_remote_id;
use crate::store::{VaultEntry, VaultStore, WriteOutcome};

/// Vault rooted at a directory on the local filesystem
pub struct FsVault {
    root: PathBuf,
    locks: PathLocks,
}

impl FsVault {
    /// Open a vault, creating the root directory if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: PathLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, rejecting anything that would
    /// escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return Err(VaultError::InvalidPath(path.to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(VaultError::OutsideRoot(path.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl VaultStore for FsVault {
    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        match fs::read_to_string(&full).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        let full = self.resolve(path)?;
        let _guard = self.locks.lock(path).await;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let existed = fs::try_exists(&full).await.unwrap_or(false);
        fs::write(&full, content).await?;

        debug!("Wrote note: {} ({} bytes)", path, content.len());
        Ok(if existed {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<()> {
        let from = self.resolve(path)?;
        let to = self.resolve(new_path)?;
        let _guard = self.locks.lock(new_path).await;

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::copy(&from, &to).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_folder(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn modified_at(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all(&self) -> Result<Vec<VaultEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Skipping unreadable directory {:?}: {}", dir, e);
                    continue;
                }
            };

            while let Some(item) = reader.next_entry().await? {
                let path = item.path();
                let file_type = item.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }

                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|_| VaultError::InvalidPath(format!("{path:?}")))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                let modified_at = item
                    .metadata()
                    .await?
                    .modified()
                    .map(DateTime::<Utc>::from)?;

                let remote_id = match fs::read_to_string(&path).await {
                    Ok(text) => parse_remote_id(&text),
                    Err(e) => {
                        warn!("Skipping unreadable note {relative}: {e}");
                        None
                    }
                };

                entries.push(VaultEntry {
                    path: relative,
                    remote_id,
                    modified_at,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Vault listing: {} notes", entries.len());
        Ok(entries)
    }
}
