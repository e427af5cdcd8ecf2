//! End-to-end scenarios exercising the orchestrator, downloader and session
//! layers together, mirroring the batch job a real `twmd download` run
//! drives.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::tempdir;
use twmd::error::ScraperError;
use twmd::model::{JobEvent, MediaItem, MediaKind};
use twmd::orchestrator::{spawn_batch_job, BatchJobOptions};
use twmd::scraper::{FetchOptions, Scraper};
use twmd::session::{Session, SessionStore};

fn item(id: &str, tweet_id: &str, username: &str, kind: MediaKind, url: &str) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        tweet_id: tweet_id.to_string(),
        username: username.to_string(),
        kind,
        url: url.to_string(),
        created_at: None,
        filename_hint: None,
    }
}

/// A scraper whose per-handle responses are scripted up front: each call to
/// `fetch_user_media` for a handle advances that handle's own queue of
/// canned results, which may be an error (to model a transient or permanent
/// scrape failure) or a list of items.
struct ScriptedScraper {
    scripts: std::collections::HashMap<String, std::sync::Mutex<Vec<ScriptedResult>>>,
}

enum ScriptedResult {
    Items(Vec<MediaItem>),
    Fail(String),
}

#[async_trait]
impl Scraper for ScriptedScraper {
    async fn initialize(&mut self, _session: &Session) -> Result<(), ScraperError> {
        Ok(())
    }

    async fn fetch_user_media(
        &mut self,
        handle: &str,
        _options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError> {
        let queue = self
            .scripts
            .get(handle)
            .ok_or_else(|| ScraperError::UserNotFound(handle.to_string()))?;
        let mut queue = queue.lock().unwrap();
        if queue.is_empty() {
            return Err(ScraperError::NoInventory(handle.to_string()));
        }
        match queue.remove(0) {
            ScriptedResult::Items(items) => Ok(items),
            ScriptedResult::Fail(message) => Err(ScraperError::Other(anyhow::anyhow!(message))),
        }
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        Ok(())
    }
}

fn store_in(dir: &std::path::Path) -> Arc<SessionStore> {
    Arc::new(SessionStore::with_path(dir.join("session.json")))
}

/// Scenario 1: happy path, two handles, one with media, one empty.
#[tokio::test]
async fn happy_path_two_handles_one_with_media_one_empty() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/media/.*".to_string()))
        .with_status(200)
        .with_body("X")
        .create_async()
        .await;

    let base = server.url();
    let mut scripts = std::collections::HashMap::new();
    scripts.insert(
        "alice".to_string(),
        std::sync::Mutex::new(vec![ScriptedResult::Items(vec![
            item("t1_m1", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m1.jpg")),
            item("t1_m2", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m2.jpg")),
            item("t2_m3", "t2", "alice", MediaKind::Video, &format!("{base}/media/t2_m3.mp4")),
        ])]),
    );
    scripts.insert("bob".to_string(), std::sync::Mutex::new(vec![ScriptedResult::Items(vec![])]));

    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let scraper = Box::new(ScriptedScraper { scripts });

    let mut handle = spawn_batch_job(
        store,
        scraper,
        BatchJobOptions {
            users: vec!["alice".to_string(), "bob".to_string()],
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );
    while handle.events.recv().await.is_some() {}
    let result = handle.result().await.unwrap();

    assert_eq!(result.total_users, 2);
    assert_eq!(result.succeeded_users, 2);
    assert_eq!(result.failed_users, 0);
    assert_eq!(result.total_media, 3);
    assert_eq!(result.downloaded, 3);
    assert_eq!(result.failed, 0);
    assert_eq!(result.skipped, 0);
    assert!(result.failure_details.is_empty());

    assert!(dir.path().join("alice").join("t1_m1.jpg").exists());
    assert!(dir.path().join("alice").join("t1_m2.jpg").exists());
    assert!(dir.path().join("alice").join("t2_m3.mp4").exists());
}

/// Scenario 2: rerunning the same job against the same `outDir` skips every
/// item whose ledger key or on-disk file already exists.
#[tokio::test]
async fn rerun_against_same_out_dir_skips_everything() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", mockito::Matcher::Regex(r"^/media/.*".to_string()))
        .with_status(200)
        .with_body("X")
        .expect(3)
        .create_async()
        .await;

    let base = server.url();
    let items = vec![
        item("t1_m1", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m1.jpg")),
        item("t1_m2", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m2.jpg")),
        item("t2_m3", "t2", "alice", MediaKind::Video, &format!("{base}/media/t2_m3.mp4")),
    ];

    let dir = tempdir().unwrap();
    let run_once = |items: Vec<MediaItem>| {
        let dir_path = dir.path().to_path_buf();
        async move {
            let mut scripts = std::collections::HashMap::new();
            scripts.insert("alice".to_string(), std::sync::Mutex::new(vec![ScriptedResult::Items(items)]));
            let store = store_in(&dir_path);
            let scraper = Box::new(ScriptedScraper { scripts });
            let mut handle = spawn_batch_job(
                store,
                scraper,
                BatchJobOptions {
                    users: vec!["alice".to_string()],
                    output_dir: dir_path,
                    ..Default::default()
                },
            );
            while handle.events.recv().await.is_some() {}
            handle.result().await.unwrap()
        }
    };

    let first = run_once(items.clone()).await;
    assert_eq!(first.downloaded, 3);

    let second = run_once(items).await;
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.failed, 0);

    mock.assert_async().await;
}

/// Scenario 3: a transient failure (500, 500, 200) is retried to success
/// within the configured per-item retry budget.
#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/media/t1_m1.jpg")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/media/t1_m1.jpg")
        .with_status(200)
        .with_body("X")
        .expect(1)
        .create_async()
        .await;

    let base = server.url();
    let mut scripts = std::collections::HashMap::new();
    scripts.insert(
        "alice".to_string(),
        std::sync::Mutex::new(vec![ScriptedResult::Items(vec![item(
            "t1_m1",
            "t1",
            "alice",
            MediaKind::Image,
            &format!("{base}/media/t1_m1.jpg"),
        )])]),
    );

    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let scraper = Box::new(ScriptedScraper { scripts });

    let mut handle = spawn_batch_job(
        store,
        scraper,
        BatchJobOptions {
            users: vec!["alice".to_string()],
            output_dir: dir.path().to_path_buf(),
            retry_count: 2,
            ..Default::default()
        },
    );
    while handle.events.recv().await.is_some() {}
    let result = handle.result().await.unwrap();

    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 0);
    assert!(result.failure_details.is_empty());
}

/// Scenario 4: a permanently-failing URL (404 on every attempt) is recorded
/// as a media-scope failure detail while the account itself still counts as
/// succeeded, because the scrape call that produced the item succeeded.
#[tokio::test]
async fn permanent_failure_is_reported_but_account_still_succeeds() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/media/t2_m3.mp4").with_status(404).create_async().await;

    let base = server.url();
    let mut scripts = std::collections::HashMap::new();
    scripts.insert(
        "alice".to_string(),
        std::sync::Mutex::new(vec![ScriptedResult::Items(vec![item(
            "t2_m3",
            "t2",
            "alice",
            MediaKind::Video,
            &format!("{base}/media/t2_m3.mp4"),
        )])]),
    );

    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let scraper = Box::new(ScriptedScraper { scripts });

    let mut handle = spawn_batch_job(
        store,
        scraper,
        BatchJobOptions {
            users: vec!["alice".to_string()],
            output_dir: dir.path().to_path_buf(),
            retry_count: 0,
            ..Default::default()
        },
    );
    while handle.events.recv().await.is_some() {}
    let result = handle.result().await.unwrap();

    assert_eq!(result.succeeded_users, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.failure_details.len(), 1);
    let detail = &result.failure_details[0];
    assert_eq!(detail.code.as_deref(), Some("HTTP_404"));
    assert_eq!(detail.attempts, Some(1));
}

/// Scenario 5: the scraper throws on the first call for a handle and
/// succeeds on the second; with `userRetryCount=1` the account is retried
/// once and ultimately counted as succeeded with one user-scope failure
/// detail recorded for the failed attempt.
#[tokio::test]
async fn user_level_retry_recovers_on_second_attempt() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/media/.*".to_string()))
        .with_status(200)
        .with_body("X")
        .create_async()
        .await;

    let base = server.url();
    let mut scripts = std::collections::HashMap::new();
    scripts.insert(
        "alice".to_string(),
        std::sync::Mutex::new(vec![
            ScriptedResult::Fail("timeout".to_string()),
            ScriptedResult::Items(vec![
                item("t1_m1", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m1.jpg")),
                item("t1_m2", "t1", "alice", MediaKind::Image, &format!("{base}/media/t1_m2.jpg")),
            ]),
        ]),
    );

    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let scraper = Box::new(ScriptedScraper { scripts });

    let mut handle = spawn_batch_job(
        store,
        scraper,
        BatchJobOptions {
            users: vec!["alice".to_string()],
            output_dir: dir.path().to_path_buf(),
            user_retry_count: 1,
            ..Default::default()
        },
    );

    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    let result = handle.result().await.unwrap();

    assert_eq!(result.succeeded_users, 1);
    assert_eq!(result.failed_users, 0);
    assert_eq!(result.total_media, 2);
    assert_eq!(result.downloaded, 2);

    let user_failures: Vec<_> = result
        .failure_details
        .iter()
        .filter(|d| d.scope == twmd::model::FailureScope::User)
        .collect();
    assert_eq!(user_failures.len(), 1);
    assert_eq!(user_failures[0].attempts, Some(1));

    assert!(matches!(events[0], JobEvent::JobStarted { .. }));
    assert!(matches!(events[1], JobEvent::UserStarted { .. }));
    assert!(matches!(events[2], JobEvent::Warning { .. }));
    assert!(matches!(events[3], JobEvent::MediaFound { count: 2, .. }));
}

/// Scenario 6: strict cookie validation rejects a session missing `ct0`,
/// naming the missing cookie; the same input with `strict=false` succeeds
/// and expands both cookies across every platform domain.
#[test]
fn strict_login_rejects_missing_ct0_lenient_login_expands_domains() {
    let err = Session::from_cookie_text("auth_token=A; dummy=1", true).unwrap_err();
    assert!(err.to_string().contains("ct0"));

    let session = Session::from_cookie_text("auth_token=A; dummy=1", false).unwrap();
    let names: Vec<_> = session.normalized_cookies().iter().map(|c| c.name.clone()).collect();
    assert!(names.iter().any(|n| n == "auth_token"));

    let domains: Vec<_> = session.normalized_cookies().iter().map(|c| c.domain.clone()).collect();
    assert!(domains.iter().any(|d| d.contains("x.com")));
    assert!(domains.iter().any(|d| d.contains("twitter.com")));
}

#[test]
fn session_round_trips_through_the_store() {
    let dir = tempdir().unwrap();
    let store = SessionStore::with_path(dir.path().join("session.json"));
    let session = Session::from_cookie_text("auth_token=A1; ct0=C1", true).unwrap();
    store.save(&session).unwrap();

    let loaded = store.load().unwrap().expect("session should load back");
    assert_eq!(loaded.cookies, session.cookies);
    assert_eq!(loaded.valid, session.valid);
}
