//! Periodic plugin rescan.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::Result;

use super::host::PluginHost;

/// Background service that refreshes routes and the registry on an interval.
pub struct PluginWatcher {
    host: Arc<PluginHost>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl PluginWatcher {
    pub fn new(host: Arc<PluginHost>, interval_secs: u64) -> Self {
        Self {
            host,
            interval: Duration::from_secs(interval_secs.max(1)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the rescan loop in the background.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Plugin watcher already running");
                return Ok(());
            }
            *running = true;
        }

        let host = Arc::clone(&self.host);
        let interval_duration = self.interval;
        let running = Arc::clone(&self.running);

        info!(
            interval_secs = interval_duration.as_secs(),
            dir = %host.settings().root.display(),
            "Plugin watcher started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval_duration);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    info!("Plugin watcher stopped");
                    break;
                }

                if let Err(e) = Self::tick(&host).await {
                    error!(error = %e, "Plugin rescan failed");
                }
            }
        });

        Ok(())
    }

    /// Stop the rescan loop after its current tick.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Rescan immediately.
    pub async fn trigger_now(&self) -> Result<()> {
        Self::tick(&self.host).await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn tick(host: &PluginHost) -> Result<()> {
        let outcome = host.refresh().await?;
        debug!(
            new_routes = outcome.routes.new_routes.len(),
            removed_routes = outcome.routes.removed_routes.len(),
            "Plugin rescan complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin::BuiltinCatalog;
    use crate::plugins::function::CommandLimits;
    use crate::plugins::registry::PluginSettings;
    use tempfile::TempDir;

    fn watcher(tmp: &TempDir, interval_secs: u64) -> PluginWatcher {
        let host = PluginHost::new(
            PluginSettings {
                root: tmp.path().join("apps"),
                reserved_prefix: "__".into(),
                limits: CommandLimits::default(),
            },
            BuiltinCatalog::with_defaults(),
            tmp.path().join("routes.txt"),
        );
        PluginWatcher::new(Arc::new(host), interval_secs)
    }

    #[tokio::test]
    async fn test_start_stop() {
        let tmp = TempDir::new().unwrap();
        let watcher = watcher(&tmp, 60);

        assert!(!watcher.is_running().await);
        watcher.start().await.unwrap();
        assert!(watcher.is_running().await);
        watcher.start().await.unwrap();
        watcher.stop().await;
        assert!(!watcher.is_running().await);
    }

    #[tokio::test]
    async fn test_trigger_now_loads_plugins() {
        let tmp = TempDir::new().unwrap();
        let watcher = watcher(&tmp, 60);
        let dir = tmp.path().join("apps/add");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();

        watcher.trigger_now().await.unwrap();
        assert!(watcher.host.registry().read().await.contains("add"));
        assert!(tmp.path().join("routes.txt").is_file());
    }

    #[test]
    fn test_interval_has_floor() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(watcher(&tmp, 0).interval, Duration::from_secs(1));
    }
}
