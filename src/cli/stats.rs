//! Stats command.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Local;

use funcbox::stats::{StatsRecorder, MAX_DAYS};

use super::load_config;

pub(crate) async fn cmd_stats(config_path: Option<&Path>, days: Option<u32>) -> Result<()> {
    let config = load_config(config_path)?;
    let recorder = StatsRecorder::new(config.paths.stats_file.clone());
    let days = report_days(days, config.stats.default_days);

    let snapshot = recorder
        .snapshot()
        .await
        .with_context(|| format!("Failed to read {}", config.paths.stats_file.display()))?;

    println!("Total invocations: {}", snapshot.total);
    if !snapshot.functions.is_empty() {
        println!();
        let width = snapshot.functions.keys().map(String::len).max().unwrap_or(0);
        for (name, count) in &snapshot.functions {
            println!("  {:<width$}  {}", name, count, width = width);
        }
    }

    let daily = snapshot
        .daily(Local::now().date_naive(), days)
        .ok_or_else(|| anyhow!("Cannot report {} days before today", days))?;

    println!();
    println!("Last {} days:", days);
    for (day, bucket) in daily {
        println!("  {}  {}", day, bucket.total);
    }

    Ok(())
}

/// Days to report: the requested count, else the configured default, kept
/// within what the server would accept.
fn report_days(requested: Option<u32>, default_days: u32) -> u32 {
    requested.unwrap_or(default_days).clamp(1, MAX_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_days_is_clamped() {
        assert_eq!(report_days(None, 7), 7);
        assert_eq!(report_days(Some(14), 7), 14);
        assert_eq!(report_days(Some(0), 7), 1);
        assert_eq!(report_days(Some(u32::MAX), 7), MAX_DAYS);
        assert_eq!(report_days(None, 100_000), MAX_DAYS);
    }
}
