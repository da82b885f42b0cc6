//! Function commands: refresh, list and one-off calls.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::RwLock;

use funcbox::config::Config;
use funcbox::dispatch::{Dispatcher, StatsMode};
use funcbox::plugins::{
    BuiltinCatalog, FunctionInfo, PluginHost, PluginRegistry, PluginSettings,
};
use funcbox::stats::StatsRecorder;

use super::load_config;

pub(crate) async fn cmd_refresh(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let host = PluginHost::new(
        PluginSettings::from_config(&config),
        BuiltinCatalog::with_defaults(),
        config.paths.routes_file.clone(),
    );

    let outcome = host.refresh().await.with_context(|| "Refresh failed")?;

    if outcome.routes.new_routes.is_empty() && outcome.routes.removed_routes.is_empty() {
        println!("Routes up to date ({} total)", outcome.routes.routes.len());
        return Ok(());
    }
    for record in &outcome.routes.new_routes {
        let marker = if record.takes_filename { " (filename)" } else { "" };
        println!("+ {}{}", record.path, marker);
    }
    for route in &outcome.routes.removed_routes {
        println!("- {}", route);
    }
    println!("{} routes in {}", outcome.routes.routes.len(), config.paths.routes_file.display());
    Ok(())
}

pub(crate) async fn cmd_list(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = load_registry(&config).await?;
    let infos = registry.infos();

    if infos.is_empty() {
        println!("No functions in {}", config.paths.plugins_dir.display());
        return Ok(());
    }
    for info in &infos {
        println!("{}", signature(info));
        if !info.description.is_empty() {
            let first_line = info.description.lines().next().unwrap_or_default();
            println!("    {}", first_line);
        }
    }
    Ok(())
}

pub(crate) async fn cmd_call(config_path: Option<&Path>, name: &str, params: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let raw = parse_params(params)?;

    let registry = Arc::new(RwLock::new(load_registry(&config).await?));
    let mut dispatcher = Dispatcher::new(registry).with_stats_mode(StatsMode::Inline);
    if config.stats.enabled {
        dispatcher =
            dispatcher.with_stats(Arc::new(StatsRecorder::new(config.paths.stats_file.clone())));
    }

    let value = dispatcher.dispatch(name, &raw).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn load_registry(config: &Config) -> Result<PluginRegistry> {
    let settings = PluginSettings::from_config(config);
    tokio::task::spawn_blocking(move || {
        PluginRegistry::load(settings, BuiltinCatalog::with_defaults())
    })
    .await?
    .with_context(|| format!("Failed to load plugins from {}", config.paths.plugins_dir.display()))
}

/// Parse `key=value` arguments. Later keys win.
fn parse_params(params: &[String]) -> Result<HashMap<String, String>> {
    let mut raw = HashMap::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("Invalid parameter '{}': expected key=value", param);
        };
        if key.is_empty() {
            bail!("Invalid parameter '{}': empty key", param);
        }
        raw.insert(key.to_string(), value.to_string());
    }
    Ok(raw)
}

/// `name(a: integer, [op: string = "add"])  GET /function/name`
fn signature(info: &FunctionInfo) -> String {
    let params: Vec<String> = info
        .parameters
        .params()
        .iter()
        .map(|p| match (&p.default, p.optional) {
            (Some(default), true) => format!("[{}: {} = {}]", p.name, p.kind, default),
            (None, true) => format!("[{}: {}]", p.name, p.kind),
            _ => format!("{}: {}", p.name, p.kind),
        })
        .collect();
    format!(
        "{}({})  {} {}",
        info.name,
        params.join(", "),
        info.method,
        info.url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use funcbox::plugins::{Parameter, ParamKind, ParameterContract};
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let raw = parse_params(&["a=2".into(), "msg=x=y".into(), "a=3".into()]).unwrap();
        assert_eq!(raw["a"], "3");
        assert_eq!(raw["msg"], "x=y");
    }

    #[test]
    fn test_parse_params_rejects_bare_words() {
        assert!(parse_params(&["oops".into()]).is_err());
        assert!(parse_params(&["=1".into()]).is_err());
    }

    #[test]
    fn test_signature() {
        let info = FunctionInfo {
            name: "calculate".into(),
            url: "/function/calculate".into(),
            method: "GET".into(),
            description: String::new(),
            parameters: ParameterContract::new(vec![
                Parameter::required("num1", ParamKind::Float),
                Parameter::optional("operation", ParamKind::String, json!("add")),
            ]),
        };
        assert_eq!(
            signature(&info),
            "calculate(num1: float, [operation: string = \"add\"])  GET /function/calculate"
        );
    }
}
