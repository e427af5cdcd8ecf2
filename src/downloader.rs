use crate::ledger::{self, Ledger};
use crate::model::{DownloadOutcome, FailureDetail, FailureScope, MediaFailureRef, MediaItem};
use crate::{filename, time_utils};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:139.0) Gecko/20100101 Firefox/139.0";

pub struct DownloadOptions {
    pub output_dir: std::path::PathBuf,
    pub concurrency: usize,
    pub retry_count: u32,
    pub username: String,
    pub per_request_delay_ms: u64,
}

enum ItemOutcome {
    Downloaded(String),
    Skipped(String),
    Failed(FailureDetail),
}

/// Fetch every item in `items` into `options.output_dir`, skipping what is
/// already present (per-file existence check and the shared ledger),
/// retrying transient failures, and reporting a [`DownloadOutcome`] whose
/// counters always sum to `items.len()`.
pub async fn download_media_batch(
    client: &Client,
    items: Vec<MediaItem>,
    options: DownloadOptions,
) -> Result<DownloadOutcome> {
    let total = items.len();
    let mut ledger = Ledger::load(&options.output_dir);
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1).min(total.max(1))));
    let (tx, mut rx) = mpsc::channel::<ItemOutcome>(total.max(1));

    let mut handles = Vec::with_capacity(total);
    for item in items {
        let key = ledger::key_for(&item);
        if ledger.contains(&key) {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _ = tx.send(ItemOutcome::Skipped(key)).await;
            }));
            continue;
        }

        let target = filename::target_path(&options.output_dir, &item);
        if target.exists() {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _ = tx.send(ItemOutcome::Skipped(key)).await;
            }));
            continue;
        }

        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let retry_count = options.retry_count;
        let delay_ms = options.per_request_delay_ms;
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = fetch_one(&client, &item, &target, retry_count, delay_ms).await;
            let result = match outcome {
                Ok(()) => ItemOutcome::Downloaded(key),
                Err((message, code, attempts)) => ItemOutcome::Failed(FailureDetail {
                    scope: FailureScope::Media,
                    username: item.username.clone(),
                    message,
                    code,
                    media: Some(MediaFailureRef {
                        tweet_id: item.tweet_id.clone(),
                        media_id: item.id.clone(),
                        url: item.url.clone(),
                        target_path: Some(target.to_string_lossy().to_string()),
                    }),
                    attempts: Some(attempts),
                    timestamp: chrono::Utc::now(),
                }),
            };
            let _ = tx.send(result).await;
        }));
    }
    drop(tx);

    let mut outcome = DownloadOutcome {
        total,
        ..Default::default()
    };
    while let Some(item_outcome) = rx.recv().await {
        match item_outcome {
            ItemOutcome::Downloaded(key) => {
                ledger.record(key);
                outcome.downloaded += 1;
            }
            ItemOutcome::Skipped(key) => {
                ledger.record(key);
                outcome.skipped += 1;
            }
            ItemOutcome::Failed(detail) => {
                outcome.failed += 1;
                outcome.failure_details.push(detail);
            }
        }
    }
    for handle in handles {
        let _ = handle.await;
    }

    ledger.save().context("failed to persist download ledger")?;
    Ok(outcome)
}

/// `message, http-status-code-if-known, attempts`.
type FetchError = (String, Option<String>, u32);

/// 500ms initial interval doubling each attempt; the attempt counter (not
/// elapsed time) is what bounds the retry ladder, so elapsed time is left
/// uncapped.
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

async fn fetch_one(
    client: &Client,
    item: &MediaItem,
    target: &Path,
    retry_count: u32,
    delay_ms: u64,
) -> Result<(), FetchError> {
    let max_attempts = retry_count + 1;
    let attempt_no = std::cell::Cell::new(0u32);

    backoff::future::retry(retry_backoff(), || async {
        let attempt = attempt_no.get() + 1;
        attempt_no.set(attempt);

        if delay_ms > 0 {
            time_utils::sleep_ms(delay_ms).await;
        }

        match attempt_download(client, item, target).await {
            Ok(()) => Ok(()),
            Err((message, code, retryable)) => {
                let err = (message, code, attempt);
                if !retryable || attempt >= max_attempts {
                    Err(backoff::Error::permanent(err))
                } else {
                    warn!(
                        "download attempt {attempt}/{max_attempts} for {} failed: {}; retrying",
                        item.id, err.0
                    );
                    Err(backoff::Error::transient(err))
                }
            }
        }
    })
    .await
}

/// `message, http-status-code-if-known, retryable`.
async fn attempt_download(
    client: &Client,
    item: &MediaItem,
    target: &Path,
) -> Result<(), (String, Option<String>, bool)> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| (format!("failed to create {}: {e}", parent.display()), None, false))?;
    }

    let response = build_request(client, item).send().await.map_err(|e| {
        let message = format!("request failed: {e}");
        let retryable = is_transport_error(&e) || message_implies_transport_issue(&message);
        (message, None, retryable)
    })?;

    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        let retryable = code == 429 || code >= 500;
        return Err((format!("unexpected status {code}"), Some(format!("HTTP_{code}")), retryable));
    }

    let mut file = File::create(target)
        .await
        .map_err(|e| (format!("failed to create {}: {e}", target.display()), None, false))?;
    stream_to_file(response, &mut file)
        .await
        .map_err(|e| (format!("{e:#}"), None, true))?;
    Ok(())
}

/// A status-less fetch failure is retryable only when it looks like a
/// transport issue (connect/timeout) rather than a permanent client-side
/// problem (e.g. an invalid URL or a body-building error).
fn is_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

fn message_implies_transport_issue(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["network", "timeout", "fetch"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn build_request(client: &Client, item: &MediaItem) -> reqwest::RequestBuilder {
    let mut builder = client
        .get(&item.url)
        .header("User-Agent", USER_AGENT)
        .header("Accept-Language", "en-US,en;q=0.5")
        .header("DNT", "1")
        .header("Referer", "https://x.com/")
        .header("Origin", "https://x.com");

    builder = match item.kind {
        crate::model::MediaKind::Image => {
            builder.header("Accept", "image/avif,image/webp,image/png,image/*;q=0.8,*/*;q=0.5")
        }
        crate::model::MediaKind::Video | crate::model::MediaKind::Gif => {
            builder.header("Accept", "video/webm,video/mp4,video/*;q=0.8,*/*;q=0.5")
        }
    };
    builder
}

async fn stream_to_file(response: reqwest::Response, file: &mut File) -> Result<()> {
    let stream = response.bytes_stream();
    let mut reader =
        StreamReader::new(stream.map(|result| result.map_err(std::io::Error::other)));

    let mut buffer = vec![0u8; 8192];
    use tokio::io::AsyncReadExt;
    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .context("failed reading media body")?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])
            .await
            .context("failed writing media data")?;
    }
    debug!("finished streaming media to {}", "target file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaKind;
    use tempfile::tempdir;

    fn item(url: &str) -> MediaItem {
        MediaItem {
            id: "t1_m1".into(),
            tweet_id: "t1".into(),
            username: "alice".into(),
            kind: MediaKind::Image,
            url: url.into(),
            created_at: None,
            filename_hint: None,
        }
    }

    #[tokio::test]
    async fn batch_counters_sum_to_total() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/media.jpg")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();
        let outcome = download_media_batch(
            &client,
            vec![item(&format!("{}/media.jpg", server.url()))],
            DownloadOptions {
                output_dir: dir.path().to_path_buf(),
                concurrency: 2,
                retry_count: 1,
                username: "alice".into(),
                per_request_delay_ms: 0,
            },
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.downloaded, 1);
        assert_eq!(outcome.failed + outcome.skipped, 0);
    }

    #[tokio::test]
    async fn rerun_skips_a_file_already_on_disk() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/media.jpg")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();
        let make_opts = || DownloadOptions {
            output_dir: dir.path().to_path_buf(),
            concurrency: 1,
            retry_count: 0,
            username: "alice".into(),
            per_request_delay_ms: 0,
        };

        download_media_batch(&client, vec![item(&format!("{}/media.jpg", server.url()))], make_opts())
            .await
            .unwrap();
        let second = download_media_batch(
            &client,
            vec![item(&format!("{}/media.jpg", server.url()))],
            make_opts(),
        )
        .await
        .unwrap();

        assert_eq!(second.downloaded, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_reported_with_status_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.jpg")
            .with_status(404)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let dir = tempdir().unwrap();
        let outcome = download_media_batch(
            &client,
            vec![item(&format!("{}/missing.jpg", server.url()))],
            DownloadOptions {
                output_dir: dir.path().to_path_buf(),
                concurrency: 1,
                retry_count: 0,
                username: "alice".into(),
                per_request_delay_ms: 0,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failure_details[0].code.as_deref(), Some("HTTP_404"));
    }
}
