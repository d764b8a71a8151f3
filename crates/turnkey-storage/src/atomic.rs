//! Crash-safe JSON documents.
//!
//! A document is written to a sibling temp file, fsynced, then renamed over
//! the target. Readers only ever observe the old or the new content.

use crate::error::{StorageError, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with the pretty-printed JSON of `value`.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    file.sync_all().await.map_err(|e| StorageError::io(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

/// Load a JSON document.
///
/// A missing file yields `None`. An unreadable or malformed file is logged and
/// also yields `None`, so callers start from an empty state.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read stored document, starting empty");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed stored document, starting empty");
            None
        }
    }
}
