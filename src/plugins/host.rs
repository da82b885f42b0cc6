//! Plugin host
//!
//! Ties the route file and the loaded registry together. Every operation that
//! changes what is on disk (refresh, install, remove) goes through here so the
//! route file and the registry are updated in the same order every time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::error::{FuncboxError, Result};

use super::builtin::BuiltinCatalog;
use super::install::{install_plugin, remove_plugin};
use super::registry::{PluginRegistry, PluginSettings, ReloadReport};
use super::routes::{RefreshReport, RouteTable};

/// Summary of one function in refresh responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSummary {
    pub description: String,
    pub path: String,
}

/// Result of a refresh: route file changes plus registry changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub routes: RefreshReport,
    pub reload: ReloadReport,
}

/// Owner of the loaded registry and the route file.
pub struct PluginHost {
    settings: PluginSettings,
    catalog: BuiltinCatalog,
    registry: Arc<RwLock<PluginRegistry>>,
    routes: RouteTable,
    reload_lock: Mutex<()>,
}

impl PluginHost {
    /// Create a host with an empty registry. Call `refresh` to populate it.
    pub fn new(
        settings: PluginSettings,
        catalog: BuiltinCatalog,
        routes_file: std::path::PathBuf,
    ) -> Self {
        let registry = PluginRegistry::new(settings.clone(), catalog.clone());
        let routes = RouteTable::new(routes_file, settings.clone(), catalog.clone());
        Self {
            settings,
            catalog,
            registry: Arc::new(RwLock::new(registry)),
            routes,
            reload_lock: Mutex::new(()),
        }
    }

    /// Shared handle to the loaded registry.
    pub fn registry(&self) -> Arc<RwLock<PluginRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Reconcile and prune the route file, then reload the registry.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let _guard = self.reload_lock.lock().await;
        let routes = self.routes.refresh().await?;
        let reload = self.reload_registry().await?;
        Ok(RefreshOutcome { routes, reload })
    }

    /// Install a plugin from uploaded files, register its route and reload.
    pub async fn install(
        &self,
        name: &str,
        files: BTreeMap<String, String>,
    ) -> Result<RefreshOutcome> {
        let _guard = self.reload_lock.lock().await;

        let settings = self.settings.clone();
        let catalog = self.catalog.clone();
        let plugin = name.to_string();
        tokio::task::spawn_blocking(move || install_plugin(&settings, &catalog, &plugin, &files))
            .await
            .map_err(|e| FuncboxError::Persistence(format!("Install task failed: {}", e)))??;

        self.routes.add_route(name).await?;
        let routes = self.routes.refresh().await?;
        let reload = self.reload_registry().await?;
        Ok(RefreshOutcome { routes, reload })
    }

    /// Remove a plugin directory, prune its route and reload.
    pub async fn remove(&self, name: &str) -> Result<RefreshOutcome> {
        let _guard = self.reload_lock.lock().await;

        let settings = self.settings.clone();
        let plugin = name.to_string();
        tokio::task::spawn_blocking(move || remove_plugin(&settings, &plugin))
            .await
            .map_err(|e| FuncboxError::Persistence(format!("Remove task failed: {}", e)))??;

        let routes = self.routes.refresh().await?;
        let reload = self.reload_registry().await?;
        Ok(RefreshOutcome { routes, reload })
    }

    /// Name, description and route of every loaded function.
    pub async fn summaries(&self) -> BTreeMap<String, FunctionSummary> {
        let registry = self.registry.read().await;
        registry
            .names()
            .into_iter()
            .filter_map(|name| {
                let plugin = registry.get_plugin(&name)?;
                let summary = FunctionSummary {
                    description: plugin.description().to_string(),
                    path: plugin.url(),
                };
                Some((name, summary))
            })
            .collect()
    }

    /// Build a fresh registry off the async runtime and swap it in.
    async fn reload_registry(&self) -> Result<ReloadReport> {
        let settings = self.settings.clone();
        let catalog = self.catalog.clone();
        let fresh = tokio::task::spawn_blocking(move || PluginRegistry::load(settings, catalog))
            .await
            .map_err(|e| FuncboxError::Config(format!("Plugin reload task failed: {}", e)))??;

        let report = self.registry.write().await.replace(fresh);
        if !report.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                updated = report.updated.len(),
                "Plugin registry reloaded"
            );
        }
        Ok(report)
    }
}
