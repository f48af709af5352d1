use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

/// Errors surfaced by storage operations.
///
/// The display strings double as operator-facing response messages, so the
/// common cases stay short and stable.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found")]
    NotFound,
    #[error("Destination already exists")]
    AlreadyExists,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Metadata for one directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Filesystem seam used by the command handlers.
///
/// Paths are relative to a fixed root; `path` addresses a directory and
/// `name` an entry within it. Implementations must keep every composed
/// location inside the root.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn list(&self, path: &str) -> Result<Vec<EntryMeta>, StorageError>;
    async fn stat(&self, path: &str, name: &str) -> Result<EntryMeta, StorageError>;
    async fn read(&self, path: &str, name: &str) -> Result<Vec<u8>, StorageError>;
    async fn write(&self, path: &str, name: &str, data: &[u8]) -> Result<u64, StorageError>;
    async fn remove(&self, path: &str, name: &str) -> Result<(), StorageError>;
    async fn make_dir(&self, path: &str, name: &str) -> Result<(), StorageError>;
    async fn rename(
        &self,
        path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<EntryMeta, StorageError>;
}

/// `Storage` backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_dir(&self, path: &str) -> Result<PathBuf, StorageError> {
        let mut dir = self.root.clone();
        push_components(&mut dir, path)?;
        Ok(dir)
    }

    fn resolve_entry(&self, path: &str, name: &str) -> Result<PathBuf, StorageError> {
        let mut entry = self.resolve_dir(path)?;
        push_components(&mut entry, name)?;
        Ok(entry)
    }
}

/// Appends `raw` to `base` one component at a time.
///
/// Empty and `.` components are skipped, which also neutralizes leading
/// slashes. `..`, backslashes and NUL bytes are rejected outright so no
/// request can address anything outside the storage root.
fn push_components(base: &mut PathBuf, raw: &str) -> Result<(), StorageError> {
    for part in raw.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." || part.contains('\\') || part.contains('\0') {
            return Err(StorageError::InvalidPath(raw.to_string()));
        }
        base.push(part);
    }
    Ok(())
}

fn map_io(err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(err)
    }
}

fn entry_meta(name: String, metadata: &std::fs::Metadata) -> EntryMeta {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let created = metadata.created().unwrap_or(modified);
    EntryMeta {
        name,
        is_directory: metadata.is_dir(),
        size: metadata.len(),
        created: created.into(),
        modified: modified.into(),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(&self, path: &str) -> Result<Vec<EntryMeta>, StorageError> {
        let dir = self.resolve_dir(path)?;
        let metadata = fs::metadata(&dir).await.map_err(map_io)?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory);
        }
        let mut reader = fs::read_dir(&dir).await.map_err(map_io)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(map_io)? {
            let metadata = entry.metadata().await.map_err(map_io)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(entry_meta(name, &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str, name: &str) -> Result<EntryMeta, StorageError> {
        let entry = self.resolve_entry(path, name)?;
        let metadata = fs::metadata(&entry).await.map_err(map_io)?;
        Ok(entry_meta(name.to_string(), &metadata))
    }

    async fn read(&self, path: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let entry = self.resolve_entry(path, name)?;
        fs::read(&entry).await.map_err(map_io)
    }

    async fn write(&self, path: &str, name: &str, data: &[u8]) -> Result<u64, StorageError> {
        let entry = self.resolve_entry(path, name)?;
        fs::write(&entry, data).await.map_err(map_io)?;
        Ok(data.len() as u64)
    }

    async fn remove(&self, path: &str, name: &str) -> Result<(), StorageError> {
        let entry = self.resolve_entry(path, name)?;
        let metadata = fs::metadata(&entry).await.map_err(map_io)?;
        if metadata.is_dir() {
            fs::remove_dir_all(&entry).await.map_err(map_io)
        } else {
            fs::remove_file(&entry).await.map_err(map_io)
        }
    }

    async fn make_dir(&self, path: &str, name: &str) -> Result<(), StorageError> {
        let entry = self.resolve_entry(path, name)?;
        fs::create_dir_all(&entry).await.map_err(map_io)
    }

    async fn rename(
        &self,
        path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<EntryMeta, StorageError> {
        let from = self.resolve_entry(path, old_name)?;
        let to = self.resolve_entry(path, new_name)?;
        fs::metadata(&from).await.map_err(map_io)?;
        if fs::try_exists(&to).await.map_err(map_io)? {
            return Err(StorageError::AlreadyExists);
        }
        fs::rename(&from, &to).await.map_err(map_io)?;
        let metadata = fs::metadata(&to).await.map_err(map_io)?;
        Ok(entry_meta(new_name.to_string(), &metadata))
    }
}
