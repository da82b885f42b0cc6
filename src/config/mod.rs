//! Configuration for Funcbox
//!
//! Configuration is read from a JSON file (by default `~/.funcbox/config.json`)
//! and then overridden by `FUNCBOX_*` environment variables. Every field has a
//! default, so an absent or partial file is valid.
//!
//! # Example config.json
//!
//! ```json
//! {
//!   "server": { "host": "0.0.0.0", "port": 8000 },
//!   "paths": {
//!     "plugins_dir": "./apps",
//!     "routes_file": "./routes.txt",
//!     "stats_file": "./stats.json"
//!   },
//!   "plugins": { "rescan_interval_secs": 30 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FuncboxError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// Locations of the plugins root and the persisted files.
    pub paths: PathsConfig,
    /// Plugin discovery and execution settings.
    pub plugins: PluginsConfig,
    /// Invocation statistics settings.
    pub stats: StatsConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Filesystem locations. Relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory scanned for plugin subdirectories.
    pub plugins_dir: PathBuf,
    /// Newline-delimited route registry.
    pub routes_file: PathBuf,
    /// JSON invocation statistics document.
    pub stats_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("apps"),
            routes_file: PathBuf::from("routes.txt"),
            stats_file: PathBuf::from("stats.json"),
        }
    }
}

/// Plugin discovery and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directories starting with this prefix are never treated as plugins.
    pub reserved_prefix: String,
    /// Timeout applied to command plugins that do not declare one.
    pub default_timeout_secs: u64,
    /// Interval for the background rescan. `0` disables it.
    pub rescan_interval_secs: u64,
    /// Cap on captured stdout of a command plugin.
    pub max_output_bytes: usize,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            reserved_prefix: "__".to_string(),
            default_timeout_secs: 30,
            rescan_interval_secs: 0,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Invocation statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Whether successful invocations are recorded.
    pub enabled: bool,
    /// Number of days returned by the daily report when none is requested.
    pub default_days: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_days: 7,
        }
    }
}

impl Config {
    /// Funcbox home directory (`~/.funcbox`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".funcbox")
    }

    /// Default config file path (`~/.funcbox/config.json`).
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from `path` (or the default location) and apply
    /// environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("FUNCBOX_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::path()),
        };

        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            if explicit {
                return Err(FuncboxError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FuncboxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            FuncboxError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `FUNCBOX_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FUNCBOX_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("FUNCBOX_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid FUNCBOX_PORT"),
            }
        }
        if let Ok(dir) = std::env::var("FUNCBOX_PLUGINS_DIR") {
            self.paths.plugins_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("FUNCBOX_ROUTES_FILE") {
            self.paths.routes_file = PathBuf::from(file);
        }
        if let Ok(file) = std::env::var("FUNCBOX_STATS_FILE") {
            self.paths.stats_file = PathBuf::from(file);
        }
        if let Ok(secs) = std::env::var("FUNCBOX_RESCAN_SECS") {
            match secs.parse() {
                Ok(secs) => self.plugins.rescan_interval_secs = secs,
                Err(_) => warn!(value = %secs, "Ignoring invalid FUNCBOX_RESCAN_SECS"),
            }
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.plugins.reserved_prefix.is_empty() {
            return Err(FuncboxError::Config(
                "plugins.reserved_prefix must not be empty".to_string(),
            ));
        }
        if self.plugins.default_timeout_secs == 0 {
            return Err(FuncboxError::Config(
                "plugins.default_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration rooted in `base`, used by tests and the `--root` flag.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            paths: PathsConfig {
                plugins_dir: base.join("apps"),
                routes_file: base.join("routes.txt"),
                stats_file: base.join("stats.json"),
            },
            ..Self::default()
        }
    }
}
