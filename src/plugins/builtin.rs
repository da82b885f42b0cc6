//! Builtin functions
//!
//! Functions compiled into the server. A plugin directory binds to one with
//! `"entry": {"builtin": "<name>"}`, or implicitly when the directory has the
//! builtin's name. The builtin owns its parameter contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::Result;
use crate::security::resolve_within;

use super::coerce::Arguments;
use super::contract::{Parameter, ParameterContract, FILENAME_PARAM};
use super::function::{execution_error, Function};
use super::types::{ParamKind, Plugin};

/// Constructs a builtin bound to a plugin directory.
pub type BuiltinFactory = fn(&Plugin) -> Arc<dyn Function>;

/// Name-indexed set of builtin factories.
#[derive(Clone)]
pub struct BuiltinCatalog {
    entries: BTreeMap<String, BuiltinFactory>,
}

impl BuiltinCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The catalog shipped with the server.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        catalog.register("add", |p| Arc::new(Add::new(p)) as Arc<dyn Function>);
        catalog.register("calculate", |p| {
            Arc::new(Calculate::new(p)) as Arc<dyn Function>
        });
        catalog.register("echo_message", |p| {
            Arc::new(EchoMessage::new(p)) as Arc<dyn Function>
        });
        catalog.register("get_random_line", |p| {
            Arc::new(RandomLine::new(p)) as Arc<dyn Function>
        });
        catalog
    }

    /// Register (or replace) a builtin.
    pub fn register(&mut self, name: &str, factory: BuiltinFactory) {
        self.entries.insert(name.to_string(), factory);
    }

    /// Bind the builtin `name` to `plugin`.
    pub fn instantiate(&self, name: &str, plugin: &Plugin) -> Option<Arc<dyn Function>> {
        self.entries.get(name).map(|factory| factory(plugin))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BuiltinCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCatalog")
            .field("builtins", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

/// `add(a: integer, b: integer)`.
pub struct Add {
    name: String,
}

impl Add {
    pub fn new(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
        }
    }
}

#[async_trait]
impl Function for Add {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> ParameterContract {
        ParameterContract::new(vec![
            Parameter::required("a", ParamKind::Integer),
            Parameter::required("b", ParamKind::Integer),
        ])
    }

    async fn invoke(&self, args: Arguments) -> Result<Value> {
        let a = args.get_i64("a").unwrap_or_default();
        let b = args.get_i64("b").unwrap_or_default();
        a.checked_add(b)
            .map(Value::from)
            .ok_or_else(|| execution_error(&self.name, "integer overflow"))
    }
}

// ---------------------------------------------------------------------------
// calculate
// ---------------------------------------------------------------------------

/// `calculate(num1: float, num2: float, operation: string = "add")`.
///
/// Failures are reported in the returned object rather than as errors:
/// division by zero puts its message in `result`, an unsupported operation
/// yields `{"error": ...}`.
pub struct Calculate {
    name: String,
}

impl Calculate {
    pub fn new(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
        }
    }
}

#[async_trait]
impl Function for Calculate {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> ParameterContract {
        ParameterContract::new(vec![
            Parameter::required("num1", ParamKind::Float).describe("First operand"),
            Parameter::required("num2", ParamKind::Float).describe("Second operand"),
            Parameter::optional("operation", ParamKind::String, json!("add"))
                .describe("add, subtract, multiply or divide"),
        ])
    }

    async fn invoke(&self, args: Arguments) -> Result<Value> {
        let x = args.get_f64("num1").unwrap_or_default();
        let y = args.get_f64("num2").unwrap_or_default();
        let operation = args.get_str("operation").unwrap_or("add");

        let (result, symbol) = match operation {
            "add" => (Ok(x + y), "+"),
            "subtract" => (Ok(x - y), "-"),
            "multiply" => (Ok(x * y), "*"),
            "divide" if y == 0.0 => (Err("division by zero"), "/"),
            "divide" => (Ok(x / y), "/"),
            other => {
                return Ok(json!({ "error": format!("unsupported operation: {}", other) }))
            }
        };

        let (result, shown) = match result {
            Ok(value) => (json!(value), value.to_string()),
            Err(message) => (json!(message), message.to_string()),
        };
        Ok(json!({
            "result": result,
            "description": format!("{} {} {} = {}", x, symbol, y, shown),
        }))
    }
}

// ---------------------------------------------------------------------------
// echo_message
// ---------------------------------------------------------------------------

/// `echo_message(message: string)`.
pub struct EchoMessage {
    name: String,
}

impl EchoMessage {
    pub fn new(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
        }
    }
}

#[async_trait]
impl Function for EchoMessage {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> ParameterContract {
        ParameterContract::new(vec![
            Parameter::required("message", ParamKind::String).describe("Message to echo")
        ])
    }

    async fn invoke(&self, args: Arguments) -> Result<Value> {
        let message = args.get_str("message").unwrap_or_default();
        Ok(json!({
            "original_message": message,
            "timestamp": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// get_random_line
// ---------------------------------------------------------------------------

/// `get_random_line(filename: string)`: a random non-empty line of a file in
/// the plugin's `data/` directory.
pub struct RandomLine {
    name: String,
    data_dir: std::path::PathBuf,
}

impl RandomLine {
    pub fn new(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
            data_dir: plugin.data_dir(),
        }
    }
}

#[async_trait]
impl Function for RandomLine {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> ParameterContract {
        ParameterContract::new(vec![Parameter::required(
            FILENAME_PARAM,
            ParamKind::String,
        )
        .describe("File name inside the plugin's data directory")])
    }

    async fn invoke(&self, args: Arguments) -> Result<Value> {
        let filename = args.get_str(FILENAME_PARAM).unwrap_or_default();
        let path = resolve_within(&self.data_dir, filename)?;

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            execution_error(&self.name, format!("cannot read {}: {}", filename, e))
        })?;

        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if lines.is_empty() {
            return Ok(json!({ "error": "file is empty" }));
        }

        let index = rand::thread_rng().gen_range(0..lines.len());
        Ok(json!({ "data": lines[index] }))
    }
}
