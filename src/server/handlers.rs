//! Route handlers.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{FuncboxError, Result};
use crate::plugins::types::route_path;
use crate::stats::{Bucket, InvocationStats, DAY_FORMAT, MAX_DAYS};

use super::AppState;

pub(crate) async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn list_functions(State(state): State<AppState>) -> Json<Value> {
    let registry = state.host.registry();
    let infos = registry.read().await.infos();
    Json(json!({ "functions": infos }))
}

pub(crate) async fn call_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let value = state.dispatcher.dispatch(&name, &params).await?;
    Ok(Json(value))
}

pub(crate) async fn refresh_functions(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.host.refresh().await?;
    let new_routes: Vec<&str> = outcome
        .routes
        .new_routes
        .iter()
        .map(|r| r.path.as_str())
        .collect();

    Ok(Json(json!({
        "status": "success",
        "new_routes": new_routes,
        "removed_routes": outcome.routes.removed_routes,
        "reloaded": outcome.reload,
        "functions": state.host.summaries().await,
    })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadRequest {
    name: String,
    files: BTreeMap<String, String>,
}

pub(crate) async fn upload_function(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<Value>> {
    let outcome = state.host.install(&request.name, request.files).await?;
    Ok(Json(json!({
        "status": "success",
        "function": request.name,
        "url": route_path(&request.name),
        "reloaded": outcome.reload,
    })))
}

pub(crate) async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let outcome = state.host.remove(&name).await?;
    Ok(Json(json!({
        "status": "success",
        "function": name,
        "removed_routes": outcome.routes.removed_routes,
    })))
}

pub(crate) async fn stats_summary(State(state): State<AppState>) -> Result<Json<InvocationStats>> {
    let stats = match &state.stats {
        Some(stats) => stats.snapshot().await?,
        None => InvocationStats::default(),
    };
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DailyQuery {
    days: Option<String>,
    end: Option<String>,
}

pub(crate) async fn stats_daily(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<BTreeMap<String, Bucket>>> {
    let days = match query.days.as_deref() {
        None => state.default_days,
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|d| (1..=MAX_DAYS).contains(d))
            .ok_or_else(|| FuncboxError::InvalidParameter {
                name: "days".to_string(),
                value: raw.to_string(),
            })?,
    };
    let end = parse_day("end", query.end.as_deref())?;

    let report = match &state.stats {
        Some(stats) => stats.daily(end, days).await?,
        None => InvocationStats::default().daily(end, days),
    };
    report
        .map(Json)
        .ok_or_else(|| FuncboxError::InvalidParameter {
            name: "end".to_string(),
            value: query.end.unwrap_or_default(),
        })
}

#[derive(Debug, Deserialize)]
pub(crate) struct HourlyQuery {
    date: Option<String>,
}

pub(crate) async fn stats_hourly(
    State(state): State<AppState>,
    Query(query): Query<HourlyQuery>,
) -> Result<Json<BTreeMap<String, Bucket>>> {
    let day = parse_day("date", query.date.as_deref())?;

    let report = match &state.stats {
        Some(stats) => stats.hourly(day).await?,
        None => InvocationStats::default().hourly(day),
    };
    Ok(Json(report))
}

/// `YYYY-MM-DD`, or today when absent.
fn parse_day(param: &str, raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), DAY_FORMAT).map_err(|_| {
            FuncboxError::InvalidParameter {
                name: param.to_string(),
                value: raw.to_string(),
            }
        }),
    }
}
