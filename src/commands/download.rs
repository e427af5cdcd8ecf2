use crate::error::ErrorKind;
use crate::model::{JobEvent, MediaKind};
use crate::orchestrator::{self, BatchJobOptions};
use crate::report;
use crate::scraper::{browser::BrowserScraper, graphql::GraphqlScraper, Scraper};
use crate::session::SessionStore;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Engine {
    Graphql,
    #[value(name = "playwright", alias = "browser")]
    Browser,
}

pub struct DownloadArgs {
    pub users: Vec<String>,
    pub output_dir: PathBuf,
    pub kinds: Vec<MediaKind>,
    pub max_tweets: usize,
    pub concurrency: usize,
    pub retry: u32,
    pub user_retry: u32,
    pub user_delay_ms: u64,
    pub request_delay_ms: u64,
    pub engine: Engine,
    pub json_report: Option<PathBuf>,
    pub csv_report: Option<PathBuf>,
    pub failures_report: Option<PathBuf>,
    pub output_format_json: bool,
}

fn build_scraper(engine: Engine) -> anyhow::Result<Box<dyn Scraper>> {
    Ok(match engine {
        Engine::Graphql => Box::new(GraphqlScraper::new(
            crate::error_utils::create_http_client_with_context()?,
        )),
        Engine::Browser => Box::new(BrowserScraper::new()),
    })
}

pub async fn execute(store: Arc<SessionStore>, args: DownloadArgs) -> Result<(), ErrorKind> {
    if args.users.is_empty() {
        return Err(ErrorKind::Usage("no account handles provided".to_string()));
    }

    let scraper = build_scraper(args.engine).map_err(ErrorKind::Internal)?;
    let mut handle = orchestrator::spawn_batch_job(
        store,
        scraper,
        BatchJobOptions {
            users: args.users.clone(),
            output_dir: args.output_dir.clone(),
            kinds: args.kinds.clone(),
            max_tweets_per_user: args.max_tweets,
            concurrency: args.concurrency,
            retry_count: args.retry,
            user_retry_count: args.user_retry,
            user_delay_ms: args.user_delay_ms,
            per_request_delay_ms: args.request_delay_ms,
        },
    );

    while let Some(event) = handle.events.recv().await {
        print_event(&event, args.output_format_json);
    }

    let result = handle
        .result()
        .await
        .context("batch job failed to complete")
        .map_err(ErrorKind::from_job_failure)?;

    if let Some(path) = &args.json_report {
        report::write_json(&result, path).map_err(ErrorKind::Internal)?;
    }
    if let Some(path) = &args.csv_report {
        report::write_csv(&result, path).map_err(ErrorKind::Internal)?;
    }
    if let Some(path) = &args.failures_report {
        write_failures_only(&result, path).map_err(ErrorKind::Internal)?;
    }

    info!(
        "job complete: {}/{} accounts succeeded, {} media downloaded, {} failed, {} skipped",
        result.succeeded_users, result.total_users, result.downloaded, result.failed, result.skipped
    );

    if result.has_final_failures() {
        return Err(ErrorKind::Partial(format!(
            "{} account failure(s), {} media failure(s)",
            result.failed_users, result.failed
        )));
    }
    Ok(())
}

fn write_failures_only(result: &crate::model::JobResult, path: &Path) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(&result.failure_details)
        .context("failed to serialize failure details")?;
    std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

fn print_event(event: &JobEvent, as_json: bool) {
    if as_json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        JobEvent::JobStarted { message, .. } => info!("{message}"),
        JobEvent::UserStarted { message, .. } => info!("{message}"),
        JobEvent::MediaFound { message, .. } => info!("{message}"),
        JobEvent::DownloadProgress { message, .. } => info!("{message}"),
        JobEvent::UserFinished { message, .. } => info!("{message}"),
        JobEvent::Warning { message, .. } => warn!("{message}"),
        JobEvent::Error { message, .. } => error!("{message}"),
        JobEvent::JobFinished { message, .. } => info!("{message}"),
    }
}

/// Parse the `--users` flag (comma-separated) or a `--users-file`
/// (one handle per line, blank lines and `#`-comments ignored).
pub fn parse_users(users_flag: Option<&str>, users_file: Option<&Path>) -> Result<Vec<String>, ErrorKind> {
    match (users_flag, users_file) {
        (Some(_), Some(_)) => Err(ErrorKind::Usage(
            "--users and --users-file are mutually exclusive".to_string(),
        )),
        (Some(flag), None) => Ok(flag
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        (None, Some(path)) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))
                .map_err(|e| ErrorKind::Usage(e.to_string()))?;
            Ok(content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect())
        }
        (None, None) => Err(ErrorKind::Usage(
            "one of --users or --users-file is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_users_splits_and_trims_the_comma_separated_flag() {
        let users = parse_users(Some("alice, bob , , carol"), None).unwrap();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn parse_users_rejects_both_flag_and_file() {
        let err = parse_users(Some("alice"), Some(Path::new("x.txt"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn parse_users_rejects_neither_flag_nor_file() {
        let err = parse_users(None, None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn parse_users_reads_a_file_skipping_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice\n# a comment\n\nbob\n").unwrap();
        let users = parse_users(None, Some(&path)).unwrap();
        assert_eq!(users, vec!["alice", "bob"]);
    }
}
