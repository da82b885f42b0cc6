//! Command handlers for the `funcbox` binary.

pub(crate) mod functions;
pub(crate) mod serve;
pub(crate) mod stats;

use std::path::Path;

use anyhow::{Context, Result};

use funcbox::config::Config;

/// Load configuration, naming the file in the error.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).with_context(|| match path {
        Some(p) => format!("Failed to load configuration from {}", p.display()),
        None => "Failed to load configuration".to_string(),
    })
}
