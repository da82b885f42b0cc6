//! Funcbox - a small plugin-hosting HTTP server
//!
//! Plugins are directories under a plugins root. Each one is bound to a
//! [`plugins::Function`] and served at `GET /function/<name>`, with query
//! parameters coerced against the function's declared contract.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod plugins;
pub mod security;
pub mod server;
pub mod stats;
pub mod utils;

pub use config::Config;
pub use dispatch::{Dispatcher, StatsMode};
pub use error::{FuncboxError, Result};
pub use server::{build_app, serve, AppState};
pub use stats::StatsRecorder;
