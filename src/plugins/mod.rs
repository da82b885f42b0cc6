//! Plugin system for Funcbox
//!
//! Each plugin is a directory under the plugins root containing a
//! `config.json` manifest. Every loaded plugin is bound to a `Function`,
//! either a builtin compiled into the server or a command run per call, and
//! exposed at `/function/<name>`.
//!
//! # Architecture
//!
//! - **types**: manifest and plugin structures
//! - **loader**: directory listing, manifest loading and validation
//! - **contract**: declared parameter contracts and introspection
//! - **coerce**: query string to typed argument conversion
//! - **function**: the `Function` trait and command plugins
//! - **builtin**: functions compiled into the server
//! - **registry**: the table of loaded functions
//! - **routes**: the persisted route file
//! - **install**: installing and removing plugin directories
//! - **host**: refresh/install/remove coordination
//! - **watcher**: periodic rescan
//!
//! # Plugin Directory Structure
//!
//! ```text
//! apps/
//! ├── calculate/
//! │   ├── config.json
//! │   └── intro.md
//! ├── get_random_line/
//! │   ├── config.json
//! │   └── data/
//! │       └── quotes.txt
//! ├── word_count/
//! │   ├── config.json
//! │   └── count.sh
//! └── __staging-…/        (reserved prefix, never loaded)
//! ```
//!
//! # Example config.json (command plugin)
//!
//! ```json
//! {
//!   "description": "Count words in a text",
//!   "parameters": [
//!     { "name": "text", "type": "string" },
//!     { "name": "min_len", "type": "integer", "default": 1 }
//!   ],
//!   "entry": { "command": "./count.sh {{text}} {{min_len}}" },
//!   "timeout_secs": 5
//! }
//! ```

pub mod builtin;
pub mod coerce;
pub mod contract;
pub mod function;
pub mod host;
pub mod install;
pub mod loader;
pub mod registry;
pub mod routes;
pub mod types;
pub mod watcher;

pub use builtin::BuiltinCatalog;
pub use coerce::{coerce, Arguments, CoercionError};
pub use contract::{introspect, Parameter, ParameterContract};
pub use function::{CommandFunction, CommandLimits, Function};
pub use host::{FunctionSummary, PluginHost, RefreshOutcome};
pub use install::{install_plugin, remove_plugin};
pub use loader::{discover_plugins, list_plugins, load_plugin, validate_manifest};
pub use registry::{FunctionInfo, PluginRegistry, PluginSettings, ReloadReport};
pub use routes::{RefreshReport, RouteRecord, RouteTable};
pub use types::{EntryPoint, ParamDef, ParamKind, Plugin, PluginManifest};
pub use watcher::PluginWatcher;
