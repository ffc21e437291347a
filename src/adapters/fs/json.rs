//! Atomic JSON file helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::errors::StoreError;

/// Reject keys that would escape their directory when used as file names.
pub fn validate_key(key: &str) -> Result<&str, StoreError> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(key)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// `<dir>/<key>.json`
pub fn record_path(dir: &Path, key: &str) -> Result<PathBuf, StoreError> {
    Ok(dir.join(format!("{}.json", validate_key(key)?)))
}

/// Read and parse `path`, or `None` if it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))
}

/// Write `value` as pretty JSON via a temp file and rename, so readers
/// never observe a partial document.
pub async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    tokio::fs::create_dir_all(parent).await?;

    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Remove `path`. Returns `false` if it did not exist.
pub async fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Every `*.json` file directly inside `dir`, sorted. A missing directory
/// is empty.
pub async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Subdirectories of `dir`, sorted. A missing directory is empty.
pub async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
