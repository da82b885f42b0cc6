//! Dynamic dispatch of function calls
//!
//! A call moves through `Resolving -> Invoking -> {Succeeded, ClientError,
//! NotFound, ServerError}`:
//!
//! 1. the name is looked up in the loaded registry (`NotFound` otherwise);
//! 2. the function's contract is introspected and the raw query parameters
//!    are coerced against it (`MissingParameter`/`InvalidParameter`, nothing
//!    is invoked);
//! 3. the function runs on its own task, so a panic or a slow plugin only
//!    affects its own request;
//! 4. on success the invocation is counted in the statistics store.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FuncboxError, Result};
use crate::plugins::coerce::{coerce, Arguments};
use crate::plugins::contract::introspect;
use crate::plugins::function::{execution_error, Function};
use crate::plugins::registry::PluginRegistry;
use crate::stats::StatsRecorder;

/// When successful invocations are written to the statistics store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatsMode {
    /// Spawn the write and return immediately; failures are only logged.
    #[default]
    Background,
    /// Finish the write before returning; failures are still only logged.
    Inline,
}

/// Resolves, coerces and invokes functions by name.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<PluginRegistry>>,
    stats: Option<Arc<StatsRecorder>>,
    mode: StatsMode,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<PluginRegistry>>) -> Self {
        Self {
            registry,
            stats: None,
            mode: StatsMode::default(),
        }
    }

    /// Count successful invocations in `stats`.
    pub fn with_stats(mut self, stats: Arc<StatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_stats_mode(mut self, mode: StatsMode) -> Self {
        self.mode = mode;
        self
    }

    /// Call function `name` with raw `key -> value` parameters.
    ///
    /// # Errors
    /// - `NotFound` when no such function is loaded
    /// - `MissingParameter` / `InvalidParameter` when coercion fails
    /// - `PluginExecution` when the function fails or panics
    /// - `SecurityViolation` when the function rejects a path argument
    pub async fn dispatch(&self, name: &str, raw: &HashMap<String, String>) -> Result<Value> {
        let function = self
            .registry
            .read()
            .await
            .get(name)
            .ok_or_else(|| FuncboxError::NotFound(name.to_string()))?;

        let contract = introspect(function.as_ref());
        let args = coerce(&contract, raw)?;

        debug!(function = %name, args = args.len(), "Invoking function");
        let value = invoke_isolated(name, function, args).await?;

        self.record(name).await;
        Ok(value)
    }

    async fn record(&self, name: &str) {
        let Some(stats) = &self.stats else {
            return;
        };

        match self.mode {
            StatsMode::Background => {
                let stats = Arc::clone(stats);
                let name = name.to_string();
                tokio::spawn(async move {
                    if let Err(e) = stats.record_now(&name).await {
                        warn!(function = %name, error = %e, "Failed to record invocation");
                    }
                });
            }
            StatsMode::Inline => {
                if let Err(e) = stats.record_now(name).await {
                    warn!(function = %name, error = %e, "Failed to record invocation");
                }
            }
        }
    }
}

/// Run `function` on its own task and normalize its failure modes.
///
/// Client errors raised by the function pass through unchanged; everything
/// else, including panics, becomes `PluginExecution`.
async fn invoke_isolated(
    name: &str,
    function: Arc<dyn Function>,
    args: Arguments,
) -> Result<Value> {
    let handle = tokio::spawn(async move { function.invoke(args).await });

    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_client_error() => Err(e),
        Ok(Err(e @ FuncboxError::PluginExecution { .. })) => Err(e),
        Ok(Err(e)) => Err(execution_error(name, e.to_string())),
        Err(e) if e.is_panic() => Err(execution_error(name, panic_message(e.into_panic()))),
        Err(e) => Err(execution_error(name, e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin::BuiltinCatalog;
    use crate::plugins::contract::{Parameter, ParameterContract};
    use crate::plugins::function::CommandLimits;
    use crate::plugins::registry::PluginSettings;
    use crate::plugins::types::{EntryPoint, ParamKind, Plugin, PluginManifest};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Boom;

    #[async_trait]
    impl Function for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn contract(&self) -> ParameterContract {
            ParameterContract::default()
        }

        async fn invoke(&self, _args: Arguments) -> Result<Value> {
            panic!("kaboom");
        }
    }

    struct Failing;

    #[async_trait]
    impl Function for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn contract(&self) -> ParameterContract {
            ParameterContract::new(vec![Parameter::optional(
                "times",
                ParamKind::Integer,
                json!(1),
            )])
        }

        async fn invoke(&self, _args: Arguments) -> Result<Value> {
            Err(FuncboxError::Persistence("disk on fire".into()))
        }
    }

    fn plugin(name: &str, builtin: &str) -> Plugin {
        Plugin {
            name: name.into(),
            manifest: PluginManifest {
                entry: Some(EntryPoint::Builtin(builtin.into())),
                ..Default::default()
            },
            path: PathBuf::from("/tmp").join(name),
            intro: None,
            fingerprint: String::new(),
        }
    }

    fn registry() -> Arc<RwLock<PluginRegistry>> {
        let mut catalog = BuiltinCatalog::with_defaults();
        catalog.register("boom", |_| Arc::new(Boom) as Arc<dyn Function>);
        catalog.register("failing", |_| Arc::new(Failing) as Arc<dyn Function>);

        let mut registry = PluginRegistry::new(
            PluginSettings {
                root: PathBuf::from("/tmp"),
                reserved_prefix: "__".into(),
                limits: CommandLimits::default(),
            },
            catalog,
        );
        for (name, builtin) in [
            ("add", "add"),
            ("calculate", "calculate"),
            ("boom", "boom"),
            ("failing", "failing"),
        ] {
            registry.register(plugin(name, builtin)).unwrap();
        }
        Arc::new(RwLock::new(registry))
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let dispatcher = Dispatcher::new(registry());
        let value = dispatcher
            .dispatch("add", &raw(&[("a", "2"), ("b", "3")]))
            .await
            .unwrap();
        assert_eq!(value, json!(5));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_is_not_found() {
        let err = Dispatcher::new(registry())
            .dispatch("unknown", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FuncboxError::NotFound(ref n) if n == "unknown"));
    }

    #[tokio::test]
    async fn test_dispatch_missing_parameter_names_it() {
        let err = Dispatcher::new(registry())
            .dispatch("add", &raw(&[("a", "2")]))
            .await
            .unwrap_err();
        assert!(matches!(err, FuncboxError::MissingParameter { ref name } if name == "b"));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_value_names_parameter_and_value() {
        let err = Dispatcher::new(registry())
            .dispatch("calculate", &raw(&[("num1", "x"), ("num2", "1")]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for parameter num1: 'x'");
    }

    #[tokio::test]
    async fn test_dispatch_defaults_apply_without_parameters() {
        // every parameter of `failing` is optional, so coercion succeeds
        let err = Dispatcher::new(registry())
            .dispatch("failing", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FuncboxError::PluginExecution { .. }));
        assert_eq!(err.to_string(), "Function error: Persistence error: disk on fire");
    }

    #[tokio::test]
    async fn test_dispatch_panic_is_isolated() {
        let dispatcher = Dispatcher::new(registry());
        let err = dispatcher.dispatch("boom", &HashMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Function error: kaboom");

        let value = dispatcher
            .dispatch("add", &raw(&[("a", "1"), ("b", "1")]))
            .await
            .unwrap();
        assert_eq!(value, json!(2));
    }

    #[tokio::test]
    async fn test_successful_calls_are_recorded() {
        let tmp = TempDir::new().unwrap();
        let stats = Arc::new(StatsRecorder::new(tmp.path().join("stats.json")));
        let dispatcher = Dispatcher::new(registry())
            .with_stats(Arc::clone(&stats))
            .with_stats_mode(StatsMode::Inline);

        dispatcher
            .dispatch("add", &raw(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        let _ = dispatcher.dispatch("add", &raw(&[("a", "1")])).await;
        let _ = dispatcher.dispatch("boom", &HashMap::new()).await;

        let snapshot = stats.snapshot().await.unwrap();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.functions["add"], 1);
    }

    #[tokio::test]
    async fn test_stats_failure_does_not_fail_call() {
        let tmp = TempDir::new().unwrap();
        // a directory where the stats file should be makes every write fail
        let blocked: &Path = tmp.path();
        let stats = Arc::new(StatsRecorder::new(blocked.to_path_buf()));
        let dispatcher = Dispatcher::new(registry())
            .with_stats(stats)
            .with_stats_mode(StatsMode::Inline);

        let value = dispatcher
            .dispatch("add", &raw(&[("a", "2"), ("b", "2")]))
            .await
            .unwrap();
        assert_eq!(value, json!(4));
    }
}
