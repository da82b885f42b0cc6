//! Plugin registry for Funcbox
//!
//! This module provides the `PluginRegistry`, the table of loaded plugins and
//! the `Function` each one is bound to. The registry is built from a scan of
//! the plugins root at startup and rebuilt on explicit reload; requests only
//! ever read it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FuncboxError, Result};

use super::builtin::BuiltinCatalog;
use super::contract::{introspect, ParameterContract};
use super::function::{CommandFunction, CommandLimits, Function};
use super::loader::discover_plugins;
use super::types::{EntryPoint, Plugin};

/// Where plugins live and how command plugins are run.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub root: PathBuf,
    pub reserved_prefix: String,
    pub limits: CommandLimits,
}

impl PluginSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.paths.plugins_dir.clone(),
            reserved_prefix: config.plugins.reserved_prefix.clone(),
            limits: CommandLimits {
                timeout: Duration::from_secs(config.plugins.default_timeout_secs.max(1)),
                max_output_bytes: config.plugins.max_output_bytes,
            },
        }
    }
}

/// A loaded plugin and its callable.
#[derive(Clone)]
pub struct RegisteredFunction {
    pub plugin: Plugin,
    pub function: Arc<dyn Function>,
}

/// Listing entry served by `GET /functions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub url: String,
    pub method: String,
    pub description: String,
    pub parameters: ParameterContract,
}

/// Differences between two registry generations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Plugins whose fingerprint changed.
    pub updated: Vec<String>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Bind a loaded plugin to its callable.
///
/// - `{"command": ...}` runs the template as a child process
/// - `{"builtin": name}` binds the named builtin
/// - no entry binds the builtin named after the plugin directory
///
/// # Errors
/// `FuncboxError::Config` when the builtin does not exist or the command
/// template is empty.
pub fn bind_plugin(
    plugin: &Plugin,
    catalog: &BuiltinCatalog,
    limits: &CommandLimits,
) -> Result<Arc<dyn Function>> {
    let function: Arc<dyn Function> = match &plugin.manifest.entry {
        Some(EntryPoint::Command(template)) => {
            Arc::new(CommandFunction::new(plugin, template, limits.clone())?)
        }
        Some(EntryPoint::Builtin(builtin)) => instantiate_builtin(plugin, catalog, builtin)?,
        None => instantiate_builtin(plugin, catalog, &plugin.name)?,
    };

    if let Some(defs) = &plugin.manifest.parameters {
        let declared = ParameterContract::from_defs(defs);
        let actual = introspect(function.as_ref());
        if !same_signature(&declared, &actual) {
            warn!(
                plugin = %plugin.name,
                "Manifest parameters differ from the function's own contract; using the function's"
            );
        }
    }

    Ok(function)
}

fn instantiate_builtin(
    plugin: &Plugin,
    catalog: &BuiltinCatalog,
    builtin: &str,
) -> Result<Arc<dyn Function>> {
    catalog.instantiate(builtin, plugin).ok_or_else(|| {
        FuncboxError::Config(format!(
            "Plugin '{}' has no command and no builtin named '{}'",
            plugin.name, builtin
        ))
    })
}

fn same_signature(a: &ParameterContract, b: &ParameterContract) -> bool {
    a.len() == b.len()
        && a
            .params()
            .iter()
            .zip(b.params())
            .all(|(x, y)| x.name == y.name && x.kind == y.kind && x.optional == y.optional)
}

/// The table of loaded plugins, keyed by plugin name.
pub struct PluginRegistry {
    settings: PluginSettings,
    catalog: BuiltinCatalog,
    functions: HashMap<String, RegisteredFunction>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new(settings: PluginSettings, catalog: BuiltinCatalog) -> Self {
        Self {
            settings,
            catalog,
            functions: HashMap::new(),
        }
    }

    /// Scan the plugins root and bind every plugin that loads.
    ///
    /// Plugins that fail to load or bind are logged and left out.
    pub fn load(settings: PluginSettings, catalog: BuiltinCatalog) -> Result<Self> {
        let mut registry = Self::new(settings, catalog);

        for plugin in discover_plugins(&registry.settings.root, &registry.settings.reserved_prefix)?
        {
            let name = plugin.name.clone();
            if let Err(e) = registry.register(plugin) {
                warn!(plugin = %name, error = %e, "Failed to bind plugin, skipping");
            }
        }

        info!(
            dir = %registry.settings.root.display(),
            functions = registry.len(),
            "Loaded plugins"
        );

        Ok(registry)
    }

    /// Bind and register a plugin, replacing any plugin of the same name.
    pub fn register(&mut self, plugin: Plugin) -> Result<()> {
        let function = bind_plugin(&plugin, &self.catalog, &self.settings.limits)?;
        self.functions
            .insert(plugin.name.clone(), RegisteredFunction { plugin, function });
        Ok(())
    }

    /// Rebuild from disk and swap in the new generation.
    pub fn reload(&mut self) -> Result<ReloadReport> {
        let fresh = Self::load(self.settings.clone(), self.catalog.clone())?;
        Ok(self.replace(fresh))
    }

    /// Swap in `fresh`, reporting what changed.
    pub fn replace(&mut self, fresh: PluginRegistry) -> ReloadReport {
        let mut report = ReloadReport::default();

        for (name, entry) in &fresh.functions {
            match self.functions.get(name) {
                None => report.added.push(name.clone()),
                Some(old) if old.plugin.fingerprint != entry.plugin.fingerprint => {
                    report.updated.push(name.clone())
                }
                Some(_) => {}
            }
        }
        for name in self.functions.keys() {
            if !fresh.functions.contains_key(name) {
                report.removed.push(name.clone());
            }
        }

        report.added.sort();
        report.removed.sort();
        report.updated.sort();

        for name in &report.updated {
            info!(plugin = %name, "Plugin changed on disk, reloaded");
        }

        self.functions = fresh.functions;
        report
    }

    /// The callable bound to `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).map(|e| Arc::clone(&e.function))
    }

    pub fn get_plugin(&self, name: &str) -> Option<&Plugin> {
        self.functions.get(name).map(|e| &e.plugin)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Listing of every registered function, sorted by name.
    pub fn infos(&self) -> Vec<FunctionInfo> {
        let mut infos: Vec<FunctionInfo> = self
            .functions
            .values()
            .map(|entry| FunctionInfo {
                name: entry.plugin.name.clone(),
                url: entry.plugin.url(),
                method: entry.plugin.method().to_string(),
                description: entry.plugin.description().to_string(),
                parameters: introspect(entry.function.as_ref()),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &BuiltinCatalog {
        &self.catalog
    }
}
