//! Path validation for plugin-relative file access
//!
//! Uploaded plugin files and `filename` arguments are untrusted relative
//! paths. Everything here resolves them against a base directory and rejects
//! anything that would land outside it.

use std::path::{Component, Path, PathBuf};

use crate::error::{FuncboxError, Result};

/// A validated path that is guaranteed to be within its base directory.
///
/// Only `resolve_within` constructs a `SafePath`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath {
    path: PathBuf,
}

impl SafePath {
    /// Returns a reference to the underlying path.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Converts the SafePath into a PathBuf.
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for SafePath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolve a relative path against `base`, refusing anything that escapes it.
///
/// Rejects:
/// - empty paths and paths naming the base itself
/// - absolute paths and Windows drive prefixes
/// - raw or percent-encoded `..` sequences
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use funcbox::security::resolve_within;
///
/// assert!(resolve_within(Path::new("/srv/apps/echo"), "data/lines.txt").is_ok());
/// assert!(resolve_within(Path::new("/srv/apps/echo"), "../calculate/config.json").is_err());
/// assert!(resolve_within(Path::new("/srv/apps/echo"), "/etc/passwd").is_err());
/// ```
pub fn resolve_within(base: &Path, relative: &str) -> Result<SafePath> {
    if relative.trim().is_empty() {
        return Err(FuncboxError::SecurityViolation(
            "Empty path is not allowed".to_string(),
        ));
    }

    if contains_traversal_pattern(relative) {
        return Err(FuncboxError::SecurityViolation(format!(
            "Path contains suspicious traversal pattern: {}",
            relative
        )));
    }

    let target = Path::new(relative);
    if target.is_absolute()
        || target
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(FuncboxError::SecurityViolation(format!(
            "Absolute paths are not allowed: {}",
            relative
        )));
    }

    let normalized_base = normalize_path(base);
    let normalized = normalize_path(&normalized_base.join(target));

    if normalized == normalized_base || !normalized.starts_with(&normalized_base) {
        return Err(FuncboxError::SecurityViolation(format!(
            "Path escapes plugin directory: {} is not within {}",
            relative,
            base.display()
        )));
    }

    Ok(SafePath { path: normalized })
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            _ => normalized.push(component),
        }
    }

    normalized
}

/// Early detection of obvious traversal attempts, including encoded forms.
fn contains_traversal_pattern(path: &str) -> bool {
    let patterns = [
        "..",
        "%2e%2e",
        "%252e%252e",
        "..%2f",
        "%2f..",
        "..\\",
        "\\..\\",
    ];

    let lower_path = path.to_lowercase();
    patterns.iter().any(|p| lower_path.contains(p))
}
