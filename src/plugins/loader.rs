//! Plugin discovery and loading for Funcbox
//!
//! This module handles listing plugin directories, loading and parsing their
//! `config.json` manifests, and validating manifest contents for safety and
//! correctness.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{FuncboxError, Result};

use super::function::template_placeholders;
use super::types::{EntryPoint, Plugin, PluginManifest, INTRO_FILE, MANIFEST_FILE};

static PLUGIN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_\-]{0,63}$").expect("valid regex"));

static PARAM_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]{0,63}$").expect("valid regex"));

/// Whether `name` may identify a plugin: 1-64 alphanumerics, hyphens and
/// underscores, starting with an alphanumeric.
pub fn is_valid_plugin_name(name: &str) -> bool {
    PLUGIN_NAME_RE.is_match(name)
}

/// List the plugin directories under `root`.
///
/// A plugin directory is a subdirectory whose name is a valid plugin name and
/// does not start with `reserved_prefix`. A missing root yields an empty set.
///
/// # Errors
/// `FuncboxError::Config` if `root` exists but cannot be read.
pub fn list_plugins(root: &Path, reserved_prefix: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    if !root.exists() {
        info!(dir = %root.display(), "Plugins directory does not exist");
        return Ok(names);
    }

    let entries = fs::read_dir(root).map_err(|e| {
        FuncboxError::Config(format!(
            "Failed to read plugins directory {}: {}",
            root.display(),
            e
        ))
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry, skipping");
                continue;
            }
        };

        if !entry.path().is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };

        if name.starts_with(reserved_prefix) {
            continue;
        }

        if !is_valid_plugin_name(&name) {
            debug!(dir = %name, "Skipping directory with invalid plugin name");
            continue;
        }

        names.insert(name);
    }

    Ok(names)
}

/// Load every plugin under `root`.
///
/// Plugins that fail to load are logged as warnings and skipped; one broken
/// plugin never hides the others.
pub fn discover_plugins(root: &Path, reserved_prefix: &str) -> Result<Vec<Plugin>> {
    let mut plugins = Vec::new();

    for name in list_plugins(root, reserved_prefix)? {
        let dir = root.join(&name);
        match load_plugin(&dir) {
            Ok(plugin) => {
                debug!(plugin = %plugin.name, "Discovered plugin");
                plugins.push(plugin);
            }
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Failed to load plugin, skipping"
                );
            }
        }
    }

    Ok(plugins)
}

/// Load a single plugin; its name is the directory name.
pub fn load_plugin(dir: &Path) -> Result<Plugin> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            FuncboxError::Config(format!("Invalid plugin directory {}", dir.display()))
        })?
        .to_string();
    load_plugin_named(dir, &name)
}

/// Load a plugin from `dir` under an explicit name (used for staged uploads).
///
/// # Errors
/// - `FuncboxError::Config` if `config.json` is missing, unreadable or fails
///   validation
/// - `FuncboxError::Json` if the manifest is malformed
pub fn load_plugin_named(dir: &Path, name: &str) -> Result<Plugin> {
    let manifest_path = dir.join(MANIFEST_FILE);

    if !manifest_path.exists() {
        return Err(FuncboxError::Config(format!(
            "No {} found in {}",
            MANIFEST_FILE,
            dir.display()
        )));
    }

    let bytes = fs::read(&manifest_path).map_err(|e| {
        FuncboxError::Config(format!("Failed to read {}: {}", manifest_path.display(), e))
    })?;

    let manifest: PluginManifest = serde_json::from_slice(&bytes)?;
    validate_manifest(name, &manifest)?;

    let intro = fs::read_to_string(dir.join(INTRO_FILE)).ok();
    let fingerprint = fingerprint(dir, &bytes, &manifest);

    Ok(Plugin {
        name: name.to_string(),
        manifest,
        path: dir.to_path_buf(),
        intro,
        fingerprint,
    })
}

/// Validate a manifest for correctness and safety.
///
/// Checks:
/// - plugin name is valid (see `is_valid_plugin_name`)
/// - parameter names are identifiers and unique
/// - command templates are non-empty, free of shell operators, and only
///   reference declared parameters
pub fn validate_manifest(name: &str, manifest: &PluginManifest) -> Result<()> {
    if !is_valid_plugin_name(name) {
        return Err(FuncboxError::Config(format!(
            "Invalid plugin name '{}': must be 1-64 alphanumeric characters, hyphens or underscores, starting with alphanumeric",
            name
        )));
    }

    let params = manifest.parameters.as_deref().unwrap_or_default();
    let mut seen = HashSet::new();
    for param in params {
        if !PARAM_NAME_RE.is_match(&param.name) {
            return Err(FuncboxError::Config(format!(
                "Invalid parameter name '{}' in plugin '{}'",
                param.name, name
            )));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(FuncboxError::Config(format!(
                "Duplicate parameter '{}' in plugin '{}'",
                param.name, name
            )));
        }
    }

    if let Some(EntryPoint::Command(command)) = &manifest.entry {
        if command.trim().is_empty() {
            return Err(FuncboxError::Config(format!(
                "Plugin '{}' has an empty command",
                name
            )));
        }

        validate_command_safety(command, name)?;

        for placeholder in template_placeholders(command) {
            if !seen.contains(placeholder.as_str()) {
                return Err(FuncboxError::Config(format!(
                    "Command of plugin '{}' references undeclared parameter '{}'",
                    name, placeholder
                )));
            }
        }
    }

    Ok(())
}

/// Reject command templates containing shell operators.
///
/// Commands never run through a shell, so these would be passed literally;
/// refusing them keeps manifests honest about what runs.
fn validate_command_safety(command: &str, plugin_name: &str) -> Result<()> {
    let dangerous_patterns: &[(&str, &str)] = &[
        ("&&", "command chaining (&&)"),
        ("||", "conditional chaining (||)"),
        (";", "command separator (;)"),
        ("`", "backtick execution"),
        ("$(", "command substitution"),
        ("|", "pipe operator (|)"),
        (">", "output redirection"),
        ("<", "input redirection"),
    ];

    for (pattern, description) in dangerous_patterns {
        if command.contains(pattern) {
            return Err(FuncboxError::SecurityViolation(format!(
                "Command of plugin '{}' contains dangerous pattern: {}",
                plugin_name, description
            )));
        }
    }

    Ok(())
}

/// SHA-256 over the manifest bytes and, for command plugins, the program file
/// inside the plugin directory.
fn fingerprint(dir: &Path, manifest_bytes: &[u8], manifest: &PluginManifest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest_bytes);

    if let Some(EntryPoint::Command(command)) = &manifest.entry {
        if let Some(program) = command.split_whitespace().next() {
            if let Some(relative) = program.strip_prefix("./") {
                if let Ok(bytes) = fs::read(dir.join(relative)) {
                    hasher.update(&bytes);
                }
            }
        }
    }

    hex::encode(hasher.finalize())
}
