//! Callable functions behind plugin routes
//!
//! Every plugin is bound to an `Arc<dyn Function>`. Builtins are compiled into
//! the server (see `builtin`); command plugins run an executable from the
//! plugin directory, one process per call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::{FuncboxError, Result};

use super::coerce::Arguments;
use super::contract::ParameterContract;
use super::types::{ParamDef, Plugin};

/// `{{name}}` placeholder in a command template.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("valid regex"));

/// A callable plugin entry point.
///
/// Implementations must be stateless and reentrant: the dispatcher calls
/// `invoke` concurrently from many requests.
#[async_trait]
pub trait Function: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Declared parameters, in order.
    fn contract(&self) -> ParameterContract;

    /// Run the function with coerced arguments.
    async fn invoke(&self, args: Arguments) -> Result<Value>;
}

/// Build a `PluginExecution` error for `name`.
pub fn execution_error(name: &str, message: impl Into<String>) -> FuncboxError {
    FuncboxError::PluginExecution {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Execution limits applied to command plugins.
#[derive(Debug, Clone)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// A plugin that runs a command template.
///
/// The template is split on whitespace into argv; no shell is involved.
/// Placeholders are replaced by the argument value, then the manifest
/// default; a token whose placeholder has neither is dropped. The full
/// argument object is also exported as `FUNCBOX_ARGS` (JSON).
///
/// Stdout is parsed as JSON when possible and returned as a trimmed string
/// otherwise. A non-zero exit status is a plugin error carrying stderr.
#[derive(Debug, Clone)]
pub struct CommandFunction {
    name: String,
    template: Vec<String>,
    params: Vec<ParamDef>,
    dir: PathBuf,
    env: HashMap<String, String>,
    limits: CommandLimits,
}

impl CommandFunction {
    pub fn new(plugin: &Plugin, template: &str, limits: CommandLimits) -> Result<Self> {
        let template: Vec<String> = template.split_whitespace().map(String::from).collect();
        if template.is_empty() {
            return Err(FuncboxError::Config(format!(
                "Plugin '{}' has an empty command",
                plugin.name
            )));
        }

        let limits = match plugin.manifest.timeout_secs {
            Some(secs) => CommandLimits {
                timeout: Duration::from_secs(secs.max(1)),
                ..limits
            },
            None => limits,
        };

        Ok(Self {
            name: plugin.name.clone(),
            template,
            params: plugin.manifest.parameters.clone().unwrap_or_default(),
            dir: plugin.path.clone(),
            env: plugin.manifest.env.clone(),
            limits,
        })
    }

    /// Resolve the template into argv for a call.
    pub fn render_argv(&self, args: &Arguments) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.template.len());

        'tokens: for token in &self.template {
            let mut rendered = String::with_capacity(token.len());
            let mut last = 0;
            for caps in PLACEHOLDER_RE.captures_iter(token) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                let name = &caps[1];
                let value = args.get(name).or_else(|| {
                    self.params
                        .iter()
                        .find(|p| p.name == name)
                        .and_then(|p| p.default.as_ref())
                });
                let Some(value) = value else {
                    continue 'tokens;
                };
                rendered.push_str(&token[last..whole.start()]);
                rendered.push_str(&render_value(value));
                last = whole.end();
            }
            rendered.push_str(&token[last..]);
            argv.push(rendered);
        }

        argv
    }

    fn program_path(&self, program: &str) -> PathBuf {
        if program.starts_with("./") {
            self.dir.join(program.trim_start_matches("./"))
        } else {
            PathBuf::from(program)
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Function for CommandFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> ParameterContract {
        ParameterContract::from_defs(&self.params)
    }

    async fn invoke(&self, args: Arguments) -> Result<Value> {
        let argv = self.render_argv(&args);
        let Some((program, rest)) = argv.split_first() else {
            return Err(execution_error(&self.name, "command rendered to nothing"));
        };

        debug!(function = %self.name, argv = ?argv, "Running command plugin");

        let mut cmd = tokio::process::Command::new(self.program_path(program));
        cmd.args(rest)
            .current_dir(&self.dir)
            .envs(&self.env)
            .env("FUNCBOX_ARGS", args.to_json().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| execution_error(&self.name, format!("failed to start: {}", e)))?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(execution_error(&self.name, "failed to capture output"));
        };

        let limit = self.limits.max_output_bytes;
        let stderr_task = tokio::spawn(async move { drain_capped(&mut stderr, limit).await });

        let run = async {
            let out = read_capped(&mut stdout, limit).await?;
            if out.len() > limit {
                child.kill().await?;
                return Ok::<_, std::io::Error>(None);
            }
            let status = child.wait().await?;
            let err = stderr_task
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            Ok::<_, std::io::Error>(Some((status, out, err)))
        };

        let captured = tokio::time::timeout(self.limits.timeout, run)
            .await
            .map_err(|_| {
                execution_error(
                    &self.name,
                    format!("timed out after {}s", self.limits.timeout.as_secs()),
                )
            })?
            .map_err(|e| execution_error(&self.name, format!("failed to run: {}", e)))?;

        let Some((status, stdout, stderr)) = captured else {
            return Err(execution_error(
                &self.name,
                format!("output exceeds {} bytes", limit),
            ));
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                format!("exited with {}", status)
            } else {
                stderr.to_string()
            };
            return Err(execution_error(&self.name, message));
        }

        Ok(parse_output(&stdout))
    }
}

/// Read at most `limit + 1` bytes, enough to tell whether `limit` was exceeded.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Keep the first `limit + 1` bytes and discard the rest until EOF, so the
/// child never blocks on a full pipe.
async fn drain_capped<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> std::io::Result<Vec<u8>> {
    let buf = read_capped(&mut *reader, limit).await?;
    tokio::io::copy(reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Placeholder names referenced by a command template.
pub fn template_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}
