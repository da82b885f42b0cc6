//! HTTP surface
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /functions` | list loaded functions and their contracts |
//! | `GET /function/{name}` | call a function with query parameters |
//! | `GET`/`POST /admin/refresh_functions` | reconcile routes, reload plugins |
//! | `POST /admin/upload_function` | install a plugin from JSON-encoded files |
//! | `DELETE /admin/function/{name}` | remove a plugin |
//! | `GET /stats`, `/stats/daily`, `/stats/hourly` | invocation statistics |
//! | `GET /healthz` | liveness |
//!
//! Errors are returned as `{"detail": "..."}` with the status from
//! `FuncboxError::status_code`.

mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{FuncboxError, Result};
use crate::plugins::builtin::BuiltinCatalog;
use crate::plugins::host::PluginHost;
use crate::plugins::registry::PluginSettings;
use crate::plugins::watcher::PluginWatcher;
use crate::stats::{StatsRecorder, MAX_DAYS};

/// Response header carrying the handling time in seconds.
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<PluginHost>,
    pub dispatcher: Dispatcher,
    pub stats: Option<Arc<StatsRecorder>>,
    pub default_days: u32,
}

impl AppState {
    pub fn new(host: Arc<PluginHost>, stats: Option<Arc<StatsRecorder>>) -> Self {
        let mut dispatcher = Dispatcher::new(host.registry());
        if let Some(stats) = &stats {
            dispatcher = dispatcher.with_stats(Arc::clone(stats));
        }
        Self {
            host,
            dispatcher,
            stats,
            default_days: 7,
        }
    }

    /// Build the state described by `config` and load the plugins.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let host = Arc::new(PluginHost::new(
            PluginSettings::from_config(config),
            BuiltinCatalog::with_defaults(),
            config.paths.routes_file.clone(),
        ));

        let outcome = host.refresh().await?;
        info!(
            functions = outcome.reload.added.len(),
            routes = outcome.routes.routes.len(),
            "Plugins loaded"
        );

        let stats = config
            .stats
            .enabled
            .then(|| Arc::new(StatsRecorder::new(config.paths.stats_file.clone())));

        let mut state = Self::new(host, stats);
        state.default_days = config.stats.default_days.clamp(1, MAX_DAYS);
        Ok(state)
    }
}

/// Build the application router.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/functions", get(handlers::list_functions))
        .route("/function/{name}", get(handlers::call_function))
        .route(
            "/admin/refresh_functions",
            get(handlers::refresh_functions).post(handlers::refresh_functions),
        )
        .route("/admin/upload_function", post(handlers::upload_function))
        .route("/admin/function/{name}", delete(handlers::delete_function))
        .route("/stats", get(handlers::stats_summary))
        .route("/stats/daily", get(handlers::stats_daily))
        .route("/stats/hourly", get(handlers::stats_hourly))
        .layer(axum::middleware::from_fn(process_time))
        .with_state(state)
}

/// Run the server until Ctrl+C.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config).await?;

    let watcher = (config.plugins.rescan_interval_secs > 0).then(|| {
        PluginWatcher::new(
            Arc::clone(&state.host),
            config.plugins.rescan_interval_secs,
        )
    });
    if let Some(watcher) = &watcher {
        watcher.start().await?;
    }

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Funcbox listening");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(watcher) = &watcher {
        watcher.stop().await;
    }
    info!("Funcbox stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

/// Adds `X-Process-Time` and logs each request.
async fn process_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }

    debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Handled request"
    );
    response
}

impl IntoResponse for FuncboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let detail = match &self {
            FuncboxError::Persistence(_)
            | FuncboxError::Io(_)
            | FuncboxError::Json(_)
            | FuncboxError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
