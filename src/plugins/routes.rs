//! Route registry file
//!
//! The route file lists one `/function/<name>` path per line, sorted and
//! deduplicated. It is a cache of the plugin directory listing: the listing
//! is authoritative and the file can always be rebuilt from it.
//!
//! All writes go through one `RouteTable`, which serializes them with a
//! mutex and replaces the file atomically.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{FuncboxError, Result};
use crate::utils::fs::atomic_write_async;

use super::builtin::BuiltinCatalog;
use super::contract::introspect;
use super::loader::{is_valid_plugin_name, list_plugins, load_plugin};
use super::registry::{bind_plugin, PluginSettings};
use super::types::route_path;

const ROUTE_PREFIX: &str = "/function/";

/// Registration record emitted for a newly discovered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRecord {
    pub name: String,
    pub path: String,
    /// Whether the function reads a file from its `data/` directory.
    pub takes_filename: bool,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub new_routes: Vec<RouteRecord>,
    /// The persisted route set after the pass.
    pub routes: Vec<String>,
}

/// Outcome of a full refresh (reconcile then prune).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub new_routes: Vec<RouteRecord>,
    pub removed_routes: Vec<String>,
    pub routes: Vec<String>,
}

/// Plugin name referenced by a route line, if the line is well formed.
pub fn route_name(line: &str) -> Option<&str> {
    line.strip_prefix(ROUTE_PREFIX)
        .filter(|name| is_valid_plugin_name(name))
}

/// Parse route file contents into a set of trimmed, non-empty lines.
pub fn parse_routes(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn render_routes(routes: &BTreeSet<String>) -> String {
    let mut out = String::new();
    for route in routes {
        out.push_str(route);
        out.push('\n');
    }
    out
}

/// Add a route for every plugin that lacks one.
///
/// `inspect` reports whether a plugin takes a `filename` parameter. An
/// inspection failure is logged and recorded as `false`; it never stops the pass.
/// Returns the union of old and new routes, and the new records in name
/// order.
pub fn reconcile_routes<F>(
    existing: &BTreeSet<String>,
    plugins: &BTreeSet<String>,
    mut inspect: F,
) -> (BTreeSet<String>, Vec<RouteRecord>)
where
    F: FnMut(&str) -> Result<bool>,
{
    let mut routes = existing.clone();
    let mut new_routes = Vec::new();

    for name in plugins {
        let path = route_path(name);
        if existing.contains(&path) {
            continue;
        }

        let takes_filename = match inspect(name) {
            Ok(takes) => takes,
            Err(e) => {
                warn!(plugin = %name, error = %e, "Failed to inspect plugin signature");
                false
            }
        };

        routes.insert(path.clone());
        new_routes.push(RouteRecord {
            name: name.clone(),
            path,
            takes_filename,
        });
    }

    (routes, new_routes)
}

/// Keep only well-formed routes whose plugin still exists.
pub fn prune_routes(existing: &BTreeSet<String>, plugins: &BTreeSet<String>) -> BTreeSet<String> {
    existing
        .iter()
        .filter(|route| route_name(route).is_some_and(|name| plugins.contains(name)))
        .cloned()
        .collect()
}

/// Owner of the route file.
pub struct RouteTable {
    routes_file: PathBuf,
    settings: PluginSettings,
    catalog: BuiltinCatalog,
    lock: Mutex<()>,
}

impl RouteTable {
    pub fn new(routes_file: PathBuf, settings: PluginSettings, catalog: BuiltinCatalog) -> Self {
        Self {
            routes_file,
            settings,
            catalog,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.routes_file
    }

    /// Current contents of the route file. A missing file is empty.
    pub async fn read_routes(&self) -> Result<BTreeSet<String>> {
        match tokio::fs::read_to_string(&self.routes_file).await {
            Ok(text) => Ok(parse_routes(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(FuncboxError::Persistence(format!(
                "Failed to read {}: {}",
                self.routes_file.display(),
                e
            ))),
        }
    }

    /// Register routes for plugins missing from `existing` and persist the
    /// union.
    pub async fn reconcile(&self, existing: &BTreeSet<String>) -> Result<ReconcileReport> {
        let _guard = self.lock.lock().await;
        self.reconcile_locked(existing).await
    }

    /// Drop routes whose plugin is gone and persist the rest.
    pub async fn prune(&self, existing: &BTreeSet<String>) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.prune_locked(existing).await
    }

    /// Read, reconcile and prune the route file as one step.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.lock.lock().await;

        let existing = self.read_routes().await?;
        let reconciled = self.reconcile_locked(&existing).await?;
        let union: BTreeSet<String> = reconciled.routes.iter().cloned().collect();
        let valid = self.prune_locked(&union).await?;

        let removed_routes: Vec<String> = union
            .iter()
            .filter(|route| !valid.contains(route))
            .cloned()
            .collect();

        if !reconciled.new_routes.is_empty() || !removed_routes.is_empty() {
            info!(
                added = reconciled.new_routes.len(),
                removed = removed_routes.len(),
                "Route registry refreshed"
            );
        }

        Ok(RefreshReport {
            new_routes: reconciled.new_routes,
            removed_routes,
            routes: valid,
        })
    }

    /// Ensure a route exists for `name`. Returns whether it was added.
    pub async fn add_route(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;

        let mut routes = self.read_routes().await?;
        if !routes.insert(route_path(name)) {
            return Ok(false);
        }
        self.write_routes(&routes).await?;
        debug!(plugin = %name, "Added route");
        Ok(true)
    }

    async fn reconcile_locked(&self, existing: &BTreeSet<String>) -> Result<ReconcileReport> {
        let plugins = list_plugins(&self.settings.root, &self.settings.reserved_prefix)?;
        let (routes, new_routes) =
            reconcile_routes(existing, &plugins, |name| self.inspect(name));

        if !new_routes.is_empty() || !self.routes_file.exists() {
            self.write_routes(&routes).await?;
        }

        Ok(ReconcileReport {
            new_routes,
            routes: routes.into_iter().collect(),
        })
    }

    async fn prune_locked(&self, existing: &BTreeSet<String>) -> Result<Vec<String>> {
        let plugins = list_plugins(&self.settings.root, &self.settings.reserved_prefix)?;
        let valid = prune_routes(existing, &plugins);

        if valid.len() != existing.len() {
            self.write_routes(&valid).await?;
        }

        Ok(valid.into_iter().collect())
    }

    /// Whether plugin `name` takes a `filename` parameter.
    fn inspect(&self, name: &str) -> Result<bool> {
        let plugin = load_plugin(&self.settings.root.join(name))?;
        let function = bind_plugin(&plugin, &self.catalog, &self.settings.limits)?;
        Ok(introspect(function.as_ref()).takes_filename())
    }

    async fn write_routes(&self, routes: &BTreeSet<String>) -> Result<()> {
        atomic_write_async(self.routes_file.clone(), render_routes(routes).into_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::function::CommandLimits;
    use crate::plugins::types::MANIFEST_FILE;
    use std::fs;
    use tempfile::TempDir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn table(tmp: &TempDir) -> RouteTable {
        let root = tmp.path().join("apps");
        fs::create_dir_all(&root).unwrap();
        RouteTable::new(
            tmp.path().join("routes.txt"),
            PluginSettings {
                root,
                reserved_prefix: "__".into(),
                limits: CommandLimits::default(),
            },
            BuiltinCatalog::with_defaults(),
        )
    }

    fn add_plugin(tmp: &TempDir, name: &str, manifest: &str) {
        let dir = tmp.path().join("apps").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    fn file_contents(tmp: &TempDir) -> String {
        fs::read_to_string(tmp.path().join("routes.txt")).unwrap()
    }

    // ---- pure helpers ----

    #[test]
    fn test_route_name() {
        assert_eq!(route_name("/function/add"), Some("add"));
        assert_eq!(route_name("/function/"), None);
        assert_eq!(route_name("/function/a/b"), None);
        assert_eq!(route_name("/other/add"), None);
    }

    #[test]
    fn test_parse_routes_trims_and_dedups() {
        let routes = parse_routes("/function/b\n\n  /function/a \n/function/b\n");
        assert_eq!(routes, set(&["/function/a", "/function/b"]));
    }

    #[test]
    fn test_reconcile_routes_adds_only_missing() {
        let existing = set(&["/function/add"]);
        let plugins = set(&["add", "calculate", "get_random_line"]);

        let (routes, new_routes) = reconcile_routes(&existing, &plugins, |name| {
            Ok(name == "get_random_line")
        });

        assert_eq!(
            routes,
            set(&[
                "/function/add",
                "/function/calculate",
                "/function/get_random_line"
            ])
        );
        assert_eq!(new_routes.len(), 2);
        assert!(!new_routes[0].takes_filename);
        assert!(new_routes[1].takes_filename);
    }

    #[test]
    fn test_reconcile_routes_isolates_inspection_failures() {
        let plugins = set(&["bad", "good"]);
        let (routes, new_routes) = reconcile_routes(&BTreeSet::new(), &plugins, |name| {
            if name == "bad" {
                Err(FuncboxError::Config("broken".into()))
            } else {
                Ok(true)
            }
        });

        assert_eq!(routes.len(), 2);
        assert!(!new_routes[0].takes_filename);
        assert!(new_routes[1].takes_filename);
    }

    #[test]
    fn test_prune_routes_drops_stale_and_malformed() {
        let existing = set(&["/function/add", "/function/gone", "garbage", "/function/"]);
        let plugins = set(&["add"]);
        assert_eq!(prune_routes(&existing, &plugins), set(&["/function/add"]));
    }

    // ---- RouteTable ----

    #[tokio::test]
    async fn test_refresh_writes_sorted_file() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);
        add_plugin(&tmp, "echo_message", "{}");
        add_plugin(&tmp, "add", "{}");
        fs::create_dir(tmp.path().join("apps/__pycache__")).unwrap();

        let report = routes.refresh().await.unwrap();
        assert_eq!(report.new_routes.len(), 2);
        assert!(report.removed_routes.is_empty());
        assert_eq!(file_contents(&tmp), "/function/add\n/function/echo_message\n");
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);
        add_plugin(&tmp, "add", "{}");
        add_plugin(&tmp, "calculate", "{}");

        let first = routes.refresh().await.unwrap();
        let after_first = file_contents(&tmp);
        let second = routes.refresh().await.unwrap();

        assert_eq!(first.routes, second.routes);
        assert!(second.new_routes.is_empty());
        assert!(second.removed_routes.is_empty());
        assert_eq!(after_first, file_contents(&tmp));
    }

    #[tokio::test]
    async fn test_refresh_adds_then_removes_exactly_one() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);
        add_plugin(&tmp, "add", "{}");
        add_plugin(&tmp, "calculate", "{}");
        routes.refresh().await.unwrap();

        add_plugin(&tmp, "echo_message", "{}");
        let report = routes.refresh().await.unwrap();
        assert_eq!(report.new_routes.len(), 1);
        assert_eq!(report.new_routes[0].path, "/function/echo_message");
        assert_eq!(report.routes.len(), 3);

        fs::remove_dir_all(tmp.path().join("apps/echo_message")).unwrap();
        let report = routes.refresh().await.unwrap();
        assert!(report.new_routes.is_empty());
        assert_eq!(report.removed_routes, vec!["/function/echo_message"]);
        assert_eq!(report.routes, vec!["/function/add", "/function/calculate"]);
    }

    #[tokio::test]
    async fn test_reconcile_detects_filename_parameter() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);
        add_plugin(&tmp, "get_random_line", "{}");
        add_plugin(&tmp, "broken", "{ not json");

        let report = routes.reconcile(&BTreeSet::new()).await.unwrap();
        let records: Vec<(&str, bool)> = report
            .new_routes
            .iter()
            .map(|r| (r.name.as_str(), r.takes_filename))
            .collect();
        assert_eq!(records, vec![("broken", false), ("get_random_line", true)]);
    }

    #[tokio::test]
    async fn test_prune_keeps_existing_plugins() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);
        add_plugin(&tmp, "add", "{}");

        let valid = routes
            .prune(&set(&["/function/add", "/function/ghost"]))
            .await
            .unwrap();
        assert_eq!(valid, vec!["/function/add"]);
        assert_eq!(file_contents(&tmp), "/function/add\n");
    }

    #[tokio::test]
    async fn test_add_route_is_deduplicated() {
        let tmp = TempDir::new().unwrap();
        let routes = table(&tmp);

        assert!(routes.add_route("add").await.unwrap());
        assert!(!routes.add_route("add").await.unwrap());
        assert_eq!(routes.read_routes().await.unwrap(), set(&["/function/add"]));
    }

    #[tokio::test]
    async fn test_read_routes_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(table(&tmp).read_routes().await.unwrap().is_empty());
    }
}
