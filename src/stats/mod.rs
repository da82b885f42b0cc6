//! Invocation statistics
//!
//! A single JSON document counts successful invocations:
//!
//! ```json
//! {
//!   "total": 3,
//!   "functions": { "add": 2, "calculate": 1 },
//!   "history_day": { "2024-05-01": { "total": 3, "functions": { "add": 2, "calculate": 1 } } },
//!   "history_hour": { "2024-05-01-09": { "total": 3, "functions": { "add": 2, "calculate": 1 } } }
//! }
//! ```
//!
//! `StatsRecorder` is the only writer. Each `record` is a locked
//! read-modify-write followed by an atomic file replace, so concurrent
//! invocations never lose counts and a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{FuncboxError, Result};
use crate::utils::fs::atomic_write_async;

/// Key format of `history_day`.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Key format of `history_hour`.
pub const HOUR_FORMAT: &str = "%Y-%m-%d-%H";

/// Longest range served by a daily report.
pub const MAX_DAYS: u32 = 366;

pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn hour_key(at: NaiveDateTime) -> String {
    at.format(HOUR_FORMAT).to_string()
}

/// Counts for one day or hour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub total: u64,
    pub functions: BTreeMap<String, u64>,
}

impl Bucket {
    fn increment(&mut self, name: &str) {
        self.total += 1;
        *self.functions.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Read a bucket leniently.
    ///
    /// Accepts the current `{total, functions}` shape and the older flat
    /// `{name: count, "total": n}` shape. Anything else is an empty bucket.
    /// A missing total is the sum of the function counts.
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        let functions = match object.get("functions") {
            Some(Value::Object(map)) => counts(map.iter()),
            Some(_) => BTreeMap::new(),
            None => counts(object.iter().filter(|(k, _)| k.as_str() != "total")),
        };

        let total = object
            .get("total")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| functions.values().sum());

        Self { total, functions }
    }
}

fn counts<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> BTreeMap<String, u64> {
    entries
        .filter_map(|(name, count)| count.as_u64().map(|c| (name.clone(), c)))
        .collect()
}

/// The persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationStats {
    pub total: u64,
    pub functions: BTreeMap<String, u64>,
    pub history_day: BTreeMap<String, Bucket>,
    pub history_hour: BTreeMap<String, Bucket>,
}

impl InvocationStats {
    /// Build from a parsed document, filling in whatever is missing or
    /// malformed with defaults.
    pub fn from_value(value: &Value) -> Self {
        let functions = value
            .get("functions")
            .and_then(Value::as_object)
            .map(|map| counts(map.iter()))
            .unwrap_or_default();

        let total = value
            .get("total")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| functions.values().sum());

        Self {
            total,
            functions,
            history_day: buckets(value.get("history_day")),
            history_hour: buckets(value.get("history_hour")),
        }
    }

    /// Count one invocation of `name` at `at`.
    pub fn record(&mut self, name: &str, at: NaiveDateTime) {
        self.total += 1;
        *self.functions.entry(name.to_string()).or_insert(0) += 1;
        self.history_day
            .entry(day_key(at.date()))
            .or_default()
            .increment(name);
        self.history_hour
            .entry(hour_key(at))
            .or_default()
            .increment(name);
    }

    /// `days` consecutive days ending at `end`, oldest first. Days without
    /// data are present with zero counts.
    ///
    /// Returns `None` when the range reaches past the earliest representable
    /// date.
    pub fn daily(&self, end: NaiveDate, days: u32) -> Option<BTreeMap<String, Bucket>> {
        (0..days.max(1))
            .rev()
            .map(|offset| {
                let day = end.checked_sub_days(Days::new(u64::from(offset)))?;
                let key = day_key(day);
                let bucket = self.history_day.get(&key).cloned().unwrap_or_default();
                Some((key, bucket))
            })
            .collect()
    }

    /// All 24 hours of `day`, zero-filled.
    pub fn hourly(&self, day: NaiveDate) -> BTreeMap<String, Bucket> {
        (0..24u32)
            .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
            .map(|at| {
                let key = hour_key(at);
                let bucket = self.history_hour.get(&key).cloned().unwrap_or_default();
                (key, bucket)
            })
            .collect()
    }
}

fn buckets(value: Option<&Value>) -> BTreeMap<String, Bucket> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(key, bucket)| (key.clone(), Bucket::from_value(bucket)))
                .collect()
        })
        .unwrap_or_default()
}

/// Single writer of the statistics file.
pub struct StatsRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatsRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count one invocation of `name` at `at` and persist.
    pub async fn record(&self, name: &str, at: NaiveDateTime) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut stats = match self.load().await {
            Ok(stats) => stats,
            Err(FuncboxError::Json(e)) => {
                self.quarantine(&e.to_string()).await;
                InvocationStats::default()
            }
            Err(e) => return Err(e),
        };

        stats.record(name, at);

        let bytes = serde_json::to_vec_pretty(&stats)?;
        atomic_write_async(self.path.clone(), bytes).await?;
        debug!(function = %name, total = stats.total, "Recorded invocation");
        Ok(())
    }

    /// Count one invocation of `name` now (local time).
    pub async fn record_now(&self, name: &str) -> Result<()> {
        self.record(name, Local::now().naive_local()).await
    }

    /// The whole aggregate. A missing or unreadable file reads as empty.
    pub async fn snapshot(&self) -> Result<InvocationStats> {
        match self.load().await {
            Ok(stats) => Ok(stats),
            Err(FuncboxError::Json(e)) => {
                warn!(path = %self.path.display(), error = %e, "Statistics file is corrupt");
                Ok(InvocationStats::default())
            }
            Err(e) => Err(e),
        }
    }

    /// See [`InvocationStats::daily`].
    pub async fn daily(
        &self,
        end: NaiveDate,
        days: u32,
    ) -> Result<Option<BTreeMap<String, Bucket>>> {
        Ok(self.snapshot().await?.daily(end, days))
    }

    pub async fn hourly(&self, day: NaiveDate) -> Result<BTreeMap<String, Bucket>> {
        Ok(self.snapshot().await?.hourly(day))
    }

    async fn load(&self) -> Result<InvocationStats> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InvocationStats::default())
            }
            Err(e) => {
                return Err(FuncboxError::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(InvocationStats::default());
        }

        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(InvocationStats::from_value(&value))
    }

    /// Move a corrupt file aside so counting can start over.
    async fn quarantine(&self, reason: &str) {
        let mut target = self.path.clone().into_os_string();
        target.push(format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S")));
        let target = PathBuf::from(target);

        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => warn!(
                path = %self.path.display(),
                moved_to = %target.display(),
                error = %reason,
                "Statistics file is corrupt, starting over"
            ),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Statistics file is corrupt and could not be moved aside"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DAY_FORMAT).unwrap()
    }

    #[test]
    fn test_record_increments_every_counter() {
        let mut stats = InvocationStats::default();
        stats.record("add", at("2024-05-01 09:15:00"));
        stats.record("add", at("2024-05-01 10:01:00"));
        stats.record("calculate", at("2024-05-02 00:00:00"));

        assert_eq!(stats.total, 3);
        assert_eq!(stats.functions["add"], 2);
        assert_eq!(stats.history_day["2024-05-01"].total, 2);
        assert_eq!(stats.history_day["2024-05-01"].functions["add"], 2);
        assert_eq!(stats.history_hour["2024-05-01-09"].total, 1);
        assert_eq!(stats.history_hour["2024-05-02-00"].functions["calculate"], 1);
    }

    #[test]
    fn test_daily_is_zero_filled_and_contiguous() {
        let mut stats = InvocationStats::default();
        stats.record("add", at("2024-05-06 12:00:00"));

        let daily = stats.daily(date("2024-05-07"), 7).unwrap();
        let keys: Vec<&str> = daily.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "2024-05-01",
                "2024-05-02",
                "2024-05-03",
                "2024-05-04",
                "2024-05-05",
                "2024-05-06",
                "2024-05-07"
            ]
        );
        assert_eq!(daily["2024-05-06"].total, 1);
        assert_eq!(daily["2024-05-07"], Bucket::default());
    }

    #[test]
    fn test_daily_crosses_month_boundary() {
        let daily = InvocationStats::default()
            .daily(date("2024-03-01"), 2)
            .unwrap();
        let keys: Vec<&str> = daily.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["2024-02-29", "2024-03-01"]);
    }

    #[test]
    fn test_daily_before_earliest_date_is_none() {
        let stats = InvocationStats::default();
        assert!(stats.daily(NaiveDate::MIN, 2).is_none());
        assert_eq!(stats.daily(NaiveDate::MIN, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_hourly_has_24_zero_filled_hours() {
        let mut stats = InvocationStats::default();
        stats.record("add", at("2024-05-01 23:59:59"));

        let hourly = stats.hourly(date("2024-05-01"));
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly["2024-05-01-00"], Bucket::default());
        assert_eq!(hourly["2024-05-01-23"].total, 1);
    }

    #[test]
    fn test_from_value_fills_missing_keys() {
        let stats = InvocationStats::from_value(&json!({ "functions": { "add": 4 } }));
        assert_eq!(stats.total, 4);
        assert!(stats.history_day.is_empty());
        assert!(stats.history_hour.is_empty());

        assert_eq!(InvocationStats::from_value(&json!([1, 2])), InvocationStats::default());
    }

    #[test]
    fn test_from_value_accepts_legacy_buckets() {
        let stats = InvocationStats::from_value(&json!({
            "total": 5,
            "functions": { "add": 3, "calculate": 2 },
            "history_day": {
                "2024-05-01": { "add": 3, "calculate": 2, "total": 5 },
                "2024-05-02": { "add": 1 },
                "2024-05-03": 7
            },
            "history_hour": {
                "2024-05-01-09": { "total": 2, "functions": { "add": 2 } }
            }
        }));

        assert_eq!(stats.history_day["2024-05-01"].total, 5);
        assert_eq!(stats.history_day["2024-05-01"].functions["calculate"], 2);
        assert_eq!(stats.history_day["2024-05-02"].total, 1);
        assert_eq!(stats.history_day["2024-05-03"], Bucket::default());
        assert_eq!(stats.history_hour["2024-05-01-09"].functions["add"], 2);
    }

    #[tokio::test]
    async fn test_recorder_persists_document() {
        let tmp = TempDir::new().unwrap();
        let recorder = StatsRecorder::new(tmp.path().join("stats.json"));

        recorder.record("add", at("2024-05-01 09:00:00")).await.unwrap();

        let value: Value =
            serde_json::from_slice(&std::fs::read(recorder.path()).unwrap()).unwrap();
        assert_eq!(value["total"], json!(1));
        assert_eq!(value["functions"]["add"], json!(1));
        assert_eq!(value["history_day"]["2024-05-01"]["total"], json!(1));
        assert_eq!(
            value["history_hour"]["2024-05-01-09"]["functions"]["add"],
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(StatsRecorder::new(tmp.path().join("stats.json")));
        let n = 50;

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move { recorder.record_now("add").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = recorder.snapshot().await.unwrap();
        assert_eq!(stats.total, n);
        assert_eq!(stats.functions["add"], n);
    }

    #[tokio::test]
    async fn test_fresh_store_reports_zero_filled() {
        let tmp = TempDir::new().unwrap();
        let recorder = StatsRecorder::new(tmp.path().join("missing.json"));

        let daily = recorder.daily(date("2024-05-07"), 3).await.unwrap().unwrap();
        assert_eq!(daily.len(), 3);
        assert!(daily.values().all(|b| b.total == 0));

        let hourly = recorder.hourly(date("2024-05-07")).await.unwrap();
        assert_eq!(hourly.len(), 24);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stats.json");
        std::fs::write(&path, "{ truncated").unwrap();
        let recorder = StatsRecorder::new(path);

        assert_eq!(recorder.snapshot().await.unwrap().total, 0);
        recorder.record_now("add").await.unwrap();
        assert_eq!(recorder.snapshot().await.unwrap().total, 1);

        let moved = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved);
    }
}
