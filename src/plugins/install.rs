//! Installing and removing plugin directories
//!
//! Uploads are written into a staging directory under the reserved prefix
//! (so scans never pick them up half-written), validated, and renamed into
//! place in one step.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{FuncboxError, Result};
use crate::security::resolve_within;

use super::builtin::BuiltinCatalog;
use super::loader::{is_valid_plugin_name, load_plugin_named};
use super::registry::{bind_plugin, PluginSettings};
use super::types::MANIFEST_FILE;

/// Check that `name` may be used as a plugin directory name.
pub fn validate_plugin_name(settings: &PluginSettings, name: &str) -> Result<()> {
    if !is_valid_plugin_name(name) || name.starts_with(&settings.reserved_prefix) {
        return Err(FuncboxError::InvalidParameter {
            name: "name".to_string(),
            value: name.to_string(),
        });
    }
    Ok(())
}

/// Install a plugin from a set of `relative path -> content` files.
///
/// Paths may be given relative to the plugin directory or prefixed with
/// `<name>/`. `config.json` is required, must validate and must bind to a
/// builtin in `catalog` or a command. An existing plugin of the same name is
/// replaced.
///
/// # Errors
/// - `InvalidParameter` for a bad name, a missing or invalid manifest, or a
///   manifest with nothing to run
/// - `SecurityViolation` for paths escaping the plugin directory
/// - `Io` when staging or moving fails
pub fn install_plugin(
    settings: &PluginSettings,
    catalog: &BuiltinCatalog,
    name: &str,
    files: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    validate_plugin_name(settings, name)?;

    let prefix = format!("{}/", name);
    let files: BTreeMap<&str, &str> = files
        .iter()
        .map(|(path, content)| {
            let path = path.trim_start_matches("./");
            (path.strip_prefix(&prefix).unwrap_or(path), content.as_str())
        })
        .collect();

    if !files.contains_key(MANIFEST_FILE) {
        return Err(FuncboxError::InvalidParameter {
            name: "files".to_string(),
            value: format!("missing {}", MANIFEST_FILE),
        });
    }

    fs::create_dir_all(&settings.root)?;
    let staging = settings.root.join(format!(
        "{}staging-{}",
        settings.reserved_prefix,
        uuid::Uuid::new_v4()
    ));

    let target = settings.root.join(name);
    let result = stage_and_commit(settings, catalog, &staging, &target, name, &files);
    if result.is_err() && staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(dir = %staging.display(), error = %e, "Failed to clean up staging directory");
        }
    }
    result
}

fn stage_and_commit(
    settings: &PluginSettings,
    catalog: &BuiltinCatalog,
    staging: &Path,
    target: &Path,
    name: &str,
    files: &BTreeMap<&str, &str>,
) -> Result<PathBuf> {
    fs::create_dir_all(staging)?;

    for (relative, content) in files {
        let path = resolve_within(staging, relative)?;
        if let Some(parent) = path.as_path().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_path(), content)?;
    }

    let plugin = load_plugin_named(staging, name).map_err(invalid_manifest)?;
    bind_plugin(&plugin, catalog, &settings.limits).map_err(invalid_manifest)?;

    let replaced = target.exists();
    if replaced {
        fs::remove_dir_all(target)?;
    }
    fs::rename(staging, target)?;

    info!(plugin = %name, files = files.len(), replaced, "Installed plugin");
    Ok(target.to_path_buf())
}

fn invalid_manifest(e: FuncboxError) -> FuncboxError {
    match e {
        FuncboxError::Config(_) | FuncboxError::Json(_) => FuncboxError::InvalidParameter {
            name: MANIFEST_FILE.to_string(),
            value: e.to_string(),
        },
        other => other,
    }
}

/// Delete the directory of plugin `name`.
///
/// # Errors
/// `NotFound` when no such plugin directory exists.
pub fn remove_plugin(settings: &PluginSettings, name: &str) -> Result<()> {
    validate_plugin_name(settings, name)?;

    let dir = settings.root.join(name);
    if !dir.is_dir() {
        return Err(FuncboxError::NotFound(name.to_string()));
    }

    fs::remove_dir_all(&dir)?;
    info!(plugin = %name, "Removed plugin");
    Ok(())
}
