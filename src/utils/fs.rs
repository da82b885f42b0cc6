//! Crash-safe file replacement.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{FuncboxError, Result};

/// Replace `path` with `bytes` atomically.
///
/// The content is written to a temporary file in the same directory, flushed
/// to disk and renamed over the target, so readers observe either the old or
/// the new file and never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(parent).map_err(|e| {
        FuncboxError::Persistence(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
        FuncboxError::Persistence(format!(
            "Failed to create temporary file in {}: {}",
            parent.display(),
            e
        ))
    })?;

    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| {
            FuncboxError::Persistence(format!(
                "Failed to write temporary file for {}: {}",
                path.display(),
                e
            ))
        })?;

    temp.persist(path).map_err(|e| {
        FuncboxError::Persistence(format!("Failed to replace {}: {}", path.display(), e))
    })?;

    Ok(())
}

/// [`atomic_write`] on the blocking thread pool, for callers on the runtime.
pub async fn atomic_write_async(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
        .await
        .map_err(|e| FuncboxError::Persistence(format!("Write task failed: {}", e)))?
}
