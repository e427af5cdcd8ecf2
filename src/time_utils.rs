use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Parse an RFC3339/ISO 8601 datetime string (e.g. a platform `created_at`).
pub fn parse_rfc3339(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse RFC3339 date: {date_str}"))
}

/// Suspend the current task for `ms` milliseconds. The single indirection
/// point callers use for pacing and backoff sleeps, so tests exercising
/// retry logic have one place to reason about.
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
