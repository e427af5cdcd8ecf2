//! Batch orchestrator: sequences per-account scraping and downloading,
//! retries failed accounts, and multiplexes a single typed event stream
//! while accumulating the job's final result.

use crate::downloader::{self, DownloadOptions};
use crate::model::{FailureDetail, FailureScope, JobEvent, JobResult, MediaKind, Progress};
use crate::scraper::{FetchOptions, Scraper};
use crate::session::{Session, SessionStore};
use crate::time_utils;
use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use std::cell::Cell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{info, warn};

/// The backoff policy shared by the per-user retry ladder: a fixed 500ms
/// initial interval doubling each attempt, uncapped in elapsed time since
/// the attempt count itself (not elapsed time) is what bounds the retries.
fn retry_backoff() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: Duration::from_secs(3600),
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Cooperative cancellation flag shared between a [`BatchJobHandle`] and the
/// background task it drives. `Notify` alone only wakes tasks already
/// waiting on it; the orchestrator polls between accounts rather than
/// awaiting, so the flag is what it actually checks.
#[derive(Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct BatchJobOptions {
    pub users: Vec<String>,
    pub output_dir: PathBuf,
    pub kinds: Vec<MediaKind>,
    pub max_tweets_per_user: usize,
    pub concurrency: usize,
    pub retry_count: u32,
    pub user_retry_count: u32,
    pub user_delay_ms: u64,
    pub per_request_delay_ms: u64,
}

impl Default for BatchJobOptions {
    fn default() -> Self {
        BatchJobOptions {
            users: Vec::new(),
            output_dir: PathBuf::from("."),
            kinds: vec![MediaKind::Image, MediaKind::Video, MediaKind::Gif],
            max_tweets_per_user: 200,
            concurrency: 4,
            retry_count: 2,
            user_retry_count: 1,
            user_delay_ms: 0,
            per_request_delay_ms: 0,
        }
    }
}

/// Handle returned by [`spawn_batch_job`]: the event stream plus a future
/// resolving to the terminal `JobResult` once the stream has been drained.
pub struct BatchJobHandle {
    pub events: mpsc::Receiver<JobEvent>,
    pub cancel: Arc<CancelToken>,
    result: oneshot::Receiver<Result<JobResult>>,
}

impl BatchJobHandle {
    pub async fn result(self) -> Result<JobResult> {
        self.result
            .await
            .map_err(|_| anyhow::anyhow!("batch job task was dropped before finishing"))?
    }

    /// Request cancellation. The orchestrator checks this between accounts
    /// and between a downloader batch finishing, so in-flight work is
    /// allowed to complete rather than abandoned mid-write.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }
}

/// Start a batch job on a background task. `session_store` supplies the
/// credential bundle (an anonymous session is synthesized when none is
/// saved yet); `scraper` is the already-selected engine implementation
/// (GraphQL by default, headless-browser as the caller's fallback choice).
pub fn spawn_batch_job(
    session_store: Arc<SessionStore>,
    scraper: Box<dyn Scraper>,
    options: BatchJobOptions,
) -> BatchJobHandle {
    let (event_tx, event_rx) = mpsc::channel(64);
    let (result_tx, result_rx) = oneshot::channel();
    let cancel = Arc::new(CancelToken::default());
    let cancel_for_task = Arc::clone(&cancel);

    tokio::spawn(async move {
        let result = run(session_store, scraper, options, event_tx.clone(), cancel_for_task).await;
        let _ = result_tx.send(result);
    });

    BatchJobHandle {
        events: event_rx,
        cancel,
        result: result_rx,
    }
}

async fn run(
    session_store: Arc<SessionStore>,
    mut scraper: Box<dyn Scraper>,
    options: BatchJobOptions,
    events: mpsc::Sender<JobEvent>,
    cancel: Arc<CancelToken>,
) -> Result<JobResult> {
    let session = session_store
        .load()
        .ok()
        .flatten()
        .unwrap_or_else(Session::anonymous);

    let mut result = JobResult::default();
    let client = Client::new();

    if let Err(e) = scraper.initialize(&session).await {
        let _ = events
            .send(JobEvent::Error {
                message: format!("failed to initialize scraper: {e}"),
                timestamp: Utc::now(),
                username: None,
            })
            .await;
        let _ = scraper.close().await;
        return Err(anyhow::Error::new(e).context("failed to initialize scraper"));
    }

    let _ = events
        .send(JobEvent::JobStarted {
            message: format!("starting batch job for {} account(s)", options.users.len()),
            timestamp: Utc::now(),
            user_count: options.users.len(),
        })
        .await;

    'accounts: for raw_handle in &options.users {
        let handle = raw_handle.trim().trim_start_matches('@').to_string();
        if handle.is_empty() {
            result.failed_users += 1;
            let _ = events
                .send(JobEvent::Warning {
                    message: "skipping empty account handle".to_string(),
                    timestamp: Utc::now(),
                    username: None,
                })
                .await;
            continue;
        }

        if cancel.is_cancelled() {
            break 'accounts;
        }

        let _ = events
            .send(JobEvent::UserStarted {
                message: format!("fetching media for @{handle}"),
                timestamp: Utc::now(),
                username: handle.clone(),
            })
            .await;

        let max_attempts = options.user_retry_count + 1;
        let attempt_no = Cell::new(0u32);

        let _ = backoff::future::retry(retry_backoff(), || async {
            let attempt = attempt_no.get() + 1;
            attempt_no.set(attempt);

            let fetch_options = FetchOptions {
                max_tweets: options.max_tweets_per_user,
                kinds: options.kinds.clone(),
            };

            match scraper.fetch_user_media(&handle, &fetch_options).await {
                Ok(items) => {
                    let _ = events
                        .send(JobEvent::MediaFound {
                            message: format!("found {} media item(s) for @{handle}", items.len()),
                            timestamp: Utc::now(),
                            username: handle.clone(),
                            count: items.len(),
                        })
                        .await;

                    let download_outcome = match downloader::download_media_batch(
                        &client,
                        items,
                        DownloadOptions {
                            output_dir: options.output_dir.clone(),
                            concurrency: options.concurrency,
                            retry_count: options.retry_count,
                            username: handle.clone(),
                            per_request_delay_ms: options.per_request_delay_ms,
                        },
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("download batch for @{handle} failed outright: {e:#}");
                            crate::model::DownloadOutcome::default()
                        }
                    };

                    result.total_media += download_outcome.total;
                    result.downloaded += download_outcome.downloaded;
                    result.failed += download_outcome.failed;
                    result.skipped += download_outcome.skipped;
                    result.failure_details.extend(download_outcome.failure_details);

                    let _ = events
                        .send(JobEvent::DownloadProgress {
                            message: format!("downloaded {}/{}", download_outcome.downloaded, download_outcome.total),
                            timestamp: Utc::now(),
                            username: handle.clone(),
                            progress: Progress {
                                total: download_outcome.total,
                                downloaded: download_outcome.downloaded,
                                failed: download_outcome.failed,
                                skipped: download_outcome.skipped,
                            },
                        })
                        .await;
                    let _ = events
                        .send(JobEvent::UserFinished {
                            message: format!("finished @{handle}"),
                            timestamp: Utc::now(),
                            username: handle.clone(),
                        })
                        .await;
                    result.succeeded_users += 1;
                    Ok(())
                }
                Err(e) => {
                    let detail = FailureDetail {
                        scope: FailureScope::User,
                        username: handle.clone(),
                        message: e.to_string(),
                        code: None,
                        media: None,
                        attempts: Some(attempt),
                        timestamp: Utc::now(),
                    };
                    if attempt < max_attempts {
                        result.failure_details.push(detail);
                        let _ = events
                            .send(JobEvent::Warning {
                                message: format!(
                                    "attempt {attempt}/{max_attempts} for @{handle} failed: {e}; retrying"
                                ),
                                timestamp: Utc::now(),
                                username: Some(handle.clone()),
                            })
                            .await;
                        Err(backoff::Error::transient(e))
                    } else {
                        result.failure_details.push(detail);
                        result.failed_users += 1;
                        let _ = events
                            .send(JobEvent::Error {
                                message: format!("@{handle} failed after {max_attempts} attempt(s): {e}"),
                                timestamp: Utc::now(),
                                username: Some(handle.clone()),
                            })
                            .await;
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        })
        .await;

        result.total_users += 1;

        if options.user_delay_ms > 0 && !cancel.is_cancelled() {
            time_utils::sleep_ms(options.user_delay_ms).await;
        }
    }

    let cancelled = cancel.is_cancelled();
    let _ = events
        .send(JobEvent::JobFinished {
            message: "batch job finished".to_string(),
            timestamp: Utc::now(),
            progress: Progress {
                total: result.total_media,
                downloaded: result.downloaded,
                failed: result.failed,
                skipped: result.skipped,
            },
            cancelled,
        })
        .await;

    if let Err(e) = scraper.close().await {
        warn!("error closing scraper: {e}");
    }

    info!(
        "batch job complete: {} user(s), {} succeeded, {} failed, {} media downloaded",
        result.total_users, result.succeeded_users, result.failed_users, result.downloaded
    );

    Ok(result)
}
