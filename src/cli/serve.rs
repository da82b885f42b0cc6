//! Serve command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::load_config;

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Default)]
pub(crate) struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub plugins_dir: Option<PathBuf>,
    pub rescan: Option<String>,
}

/// Parse interval string like "1h", "30m", "15m", "60s" into seconds.
pub fn parse_interval(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().with_context(|| "Invalid hours value")?;
        Ok(n * 3600)
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().with_context(|| "Invalid minutes value")?;
        Ok(n * 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        let n: u64 = secs.parse().with_context(|| "Invalid seconds value")?;
        Ok(n)
    } else {
        s.parse::<u64>()
            .with_context(|| "Invalid interval. Use formats like 1h, 30m, or 60s")
    }
}

pub(crate) async fn cmd_serve(config_path: Option<&Path>, overrides: ServeOverrides) -> Result<()> {
    let mut config = load_config(config_path)?;

    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(dir) = overrides.plugins_dir {
        config.paths.plugins_dir = dir;
    }
    if let Some(rescan) = overrides.rescan.as_deref() {
        config.plugins.rescan_interval_secs = parse_interval(rescan)?;
    }
    config.validate().with_context(|| "Invalid configuration")?;

    funcbox::serve(&config)
        .await
        .with_context(|| format!("Server on {} failed", config.server.bind_addr()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert_eq!(parse_interval("30m").unwrap(), 1800);
        assert_eq!(parse_interval("45s").unwrap(), 45);
        assert_eq!(parse_interval(" 10S ").unwrap(), 10);
    }

    #[test]
    fn test_parse_interval_bare_number() {
        assert_eq!(parse_interval("0").unwrap(), 0);
        assert_eq!(parse_interval("90").unwrap(), 90);
    }

    #[test]
    fn test_parse_interval_invalid() {
        assert!(parse_interval("abc").is_err());
        assert!(parse_interval("").is_err());
        assert!(parse_interval("-5s").is_err());
    }
}
