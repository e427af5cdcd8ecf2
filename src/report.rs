//! JSON/CSV rendering of a [`JobResult`] for the `--json-report`,
//! `--csv-report` and `--failures-report` CLI flags.

use crate::model::{FailureDetail, JobResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    total_users: usize,
    succeeded_users: usize,
    failed_users: usize,
    total_media: usize,
    downloaded: usize,
    failed: usize,
    skipped: usize,
    failure_details_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    summary: Summary,
    failures: &'a [FailureDetail],
}

fn summary_of(result: &JobResult) -> Summary {
    Summary {
        total_users: result.total_users,
        succeeded_users: result.succeeded_users,
        failed_users: result.failed_users,
        total_media: result.total_media,
        downloaded: result.downloaded,
        failed: result.failed,
        skipped: result.skipped,
        failure_details_count: result.failure_details.len(),
    }
}

pub fn write_json(result: &JobResult, path: &Path) -> Result<()> {
    let report = JsonReport {
        generated_at: Utc::now(),
        summary: summary_of(result),
        failures: &result.failure_details,
    };
    let data = serde_json::to_string_pretty(&report).context("failed to serialize JSON report")?;
    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

const CSV_HEADER: &str = "record_type,generated_at,total_users,succeeded_users,failed_users,total_media,downloaded,failed,skipped,failure_details_count,scope,username,code,attempts,tweet_id,media_id,url,target_path,message,timestamp";

pub fn write_csv(result: &JobResult, path: &Path) -> Result<()> {
    let generated_at = Utc::now();
    let summary = summary_of(result);
    let mut out = String::new();
    writeln!(out, "{CSV_HEADER}").unwrap();

    writeln!(
        out,
        "summary,{},{},{},{},{},{},{},{},{},,,,,,,,,",
        csv_field(&generated_at.to_rfc3339()),
        summary.total_users,
        summary.succeeded_users,
        summary.failed_users,
        summary.total_media,
        summary.downloaded,
        summary.failed,
        summary.skipped,
        summary.failure_details_count,
    )
    .unwrap();

    for detail in &result.failure_details {
        let (tweet_id, media_id, url, target_path) = match &detail.media {
            Some(media) => (
                media.tweet_id.clone(),
                media.media_id.clone(),
                media.url.clone(),
                media.target_path.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new(), String::new()),
        };
        writeln!(
            out,
            "failure,,,,,,,,,,{},{},{},{},{},{},{},{},{},{}",
            csv_field(scope_str(detail)),
            csv_field(&detail.username),
            csv_field(detail.code.as_deref().unwrap_or("")),
            detail.attempts.map(|a| a.to_string()).unwrap_or_default(),
            csv_field(&tweet_id),
            csv_field(&media_id),
            csv_field(&url),
            csv_field(&target_path),
            csv_field(&detail.message),
            csv_field(&detail.timestamp.to_rfc3339()),
        )
        .unwrap();
    }

    fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

fn scope_str(detail: &FailureDetail) -> &'static str {
    match detail.scope {
        crate::model::FailureScope::User => "user",
        crate::model::FailureScope::Media => "media",
    }
}

/// Quote a CSV field when it contains a comma, quote, or line break,
/// doubling any embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
