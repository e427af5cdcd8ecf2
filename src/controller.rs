//! HTTP+SSE controller: exposes the core engine to a local browser UI.
//!
//! A single in-process job runs at a time per [`AppState`]. `/events`
//! multiplexes that job's [`JobEvent`] stream (wrapped as `log` frames) and
//! a handful of `job` lifecycle notices onto one server-sent-event stream,
//! mirroring how the CLI driver prints the same events to stdout.

use crate::commands::download::Engine;
use crate::error::ErrorKind;
use crate::model::{JobEvent, JobResult, MediaKind};
use crate::orchestrator::{self, BatchJobOptions, CancelToken};
use crate::scraper::{browser::BrowserScraper, graphql::GraphqlScraper, Scraper};
use crate::commands;
use crate::session::{Session, SessionStore};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::warn;

const INDEX_HTML: &str = r#"<!doctype html>
<html><head><title>twmd</title></head>
<body>
<h1>twmd controller</h1>
<p>POST /api/download to start a job, GET /events for the live feed.</p>
</body></html>"#;

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFrame {
    stream: &'static str,
    line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parsed: Option<JobEvent>,
}

#[derive(Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JobNotice {
    Started { user_count: usize },
    Finished { result: JobResult },
    Error { message: String },
}

#[derive(Clone)]
enum ControllerEvent {
    Log(LogFrame),
    Job(JobNotice),
}

struct RunningJob {
    cancel: Arc<CancelToken>,
}

struct AppState {
    session_store: Arc<SessionStore>,
    events: broadcast::Sender<ControllerEvent>,
    running: Mutex<Option<RunningJob>>,
}

type SharedState = Arc<AppState>;

/// Build the router described in the spec's External Interfaces section.
/// The caller is responsible for binding a listener and calling
/// `axum::serve`; kept separate so tests can exercise the router directly.
pub fn router(session_store: Arc<SessionStore>) -> Router {
    let (events, _) = broadcast::channel(256);
    let state: SharedState = Arc::new(AppState {
        session_store,
        events,
        running: Mutex::new(None),
    });

    Router::new()
        .route("/", get(root))
        .route("/events", get(events_stream))
        .route("/api/status", get(api_status))
        .route("/api/login", post(api_login))
        .route("/api/login-interactive", post(api_login_interactive))
        .route("/api/whoami", post(api_whoami))
        .route("/api/logout", post(api_logout))
        .route("/api/download", post(api_download))
        .route("/api/stop", post(api_stop))
        .with_state(state)
}

async fn root() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn events_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        let (name, data) = match &event {
            ControllerEvent::Log(frame) => ("log", serde_json::to_string(frame).ok()?),
            ControllerEvent::Job(notice) => ("job", serde_json::to_string(notice).ok()?),
        };
        Some(Ok(Event::default().event(name).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
}

async fn api_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let running = state.running.lock().await.is_some();
    Json(StatusResponse { running })
}

/// Uniform shape for the single-shot subcommand proxies, matching §6's
/// `{exitCode, stdout, stderr, ok}`.
#[derive(Serialize)]
struct CommandResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
    ok: bool,
}

fn command_response(exit_code: i32, stdout: String, stderr: String) -> (StatusCode, Json<CommandResponse>) {
    let status = if exit_code == 0 {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(CommandResponse {
            exit_code,
            ok: exit_code == 0,
            stdout,
            stderr,
        }),
    )
}

#[derive(Deserialize)]
struct LoginRequest {
    cookies: String,
    #[serde(default = "default_true")]
    strict: bool,
}

fn default_true() -> bool {
    true
}

async fn api_login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match Session::from_cookie_text(&req.cookies, req.strict)
        .map_err(|e| ErrorKind::Auth(e.to_string()))
        .and_then(|session| {
            state
                .session_store
                .save(&session)
                .map(|()| session)
                .map_err(ErrorKind::Internal)
        }) {
        Ok(session) => command_response(
            0,
            format!("session saved with {} cookie(s)", session.cookies.len()),
            String::new(),
        ),
        Err(e) => command_response(e.exit_code(), String::new(), e.to_string()),
    }
}

/// The interactive cookie-capture flow drives a system browser window to
/// let the user log in and harvest cookies from it; that helper lives
/// outside this crate's scope (see spec §1's external collaborators), so
/// this endpoint reports a usage error pointing at `/api/login` instead.
async fn api_login_interactive() -> (StatusCode, Json<CommandResponse>) {
    command_response(
        2,
        String::new(),
        "interactive login requires the desktop browser helper, which this server does not provide; POST already-exported cookies to /api/login instead".to_string(),
    )
}

async fn api_whoami(State(state): State<SharedState>) -> (StatusCode, Json<CommandResponse>) {
    match commands::whoami::execute(&state.session_store) {
        Ok(who) => command_response(
            0,
            if who.logged_in {
                format!("logged in (updated {})", who.updated_at.unwrap_or_default())
            } else {
                "not logged in".to_string()
            },
            String::new(),
        ),
        Err(e) => command_response(e.exit_code(), String::new(), e.to_string()),
    }
}

async fn api_logout(State(state): State<SharedState>) -> (StatusCode, Json<CommandResponse>) {
    match commands::logout::execute(&state.session_store) {
        Ok(()) => command_response(0, "session cleared".to_string(), String::new()),
        Err(e) => command_response(e.exit_code(), String::new(), e.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    users: Vec<String>,
    out_dir: String,
    #[serde(default)]
    kinds: Option<Vec<String>>,
    #[serde(default)]
    max_tweets: Option<usize>,
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    retry: Option<u32>,
    #[serde(default)]
    user_retry: Option<u32>,
    #[serde(default)]
    user_delay_ms: Option<u64>,
    #[serde(default)]
    request_delay_ms: Option<u64>,
    #[serde(default)]
    engine: Option<String>,
}

async fn api_download(
    State(state): State<SharedState>,
    Json(req): Json<DownloadRequest>,
) -> axum::response::Response {
    let mut running = state.running.lock().await;
    if running.is_some() {
        return (StatusCode::CONFLICT, Json(serde_json::json!({"error": "a job is already running"})))
            .into_response();
    }

    if req.users.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "users must not be empty"})))
            .into_response();
    }

    let kinds = match &req.kinds {
        None => vec![MediaKind::Image, MediaKind::Video, MediaKind::Gif],
        Some(names) => {
            let mut kinds = Vec::with_capacity(names.len());
            for name in names {
                match MediaKind::parse(name) {
                    Some(kind) => kinds.push(kind),
                    None => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({"error": format!("unknown media kind: {name}")})),
                        )
                            .into_response()
                    }
                }
            }
            kinds
        }
    };

    let engine = match req.engine.as_deref() {
        Some("browser") | Some("playwright") => Engine::Browser,
        Some("graphql") | None => Engine::Graphql,
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("unknown engine: {other}")})),
            )
                .into_response()
        }
    };

    let scraper: Box<dyn Scraper> = match engine {
        Engine::Graphql => match crate::error_utils::create_http_client_with_context() {
            Ok(client) => Box::new(GraphqlScraper::new(client)),
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()})))
                    .into_response()
            }
        },
        Engine::Browser => Box::new(BrowserScraper::new()),
    };

    let options = BatchJobOptions {
        users: req.users.clone(),
        output_dir: std::path::PathBuf::from(&req.out_dir),
        kinds,
        max_tweets_per_user: req.max_tweets.unwrap_or(200),
        concurrency: req.concurrency.unwrap_or(4),
        retry_count: req.retry.unwrap_or(2),
        user_retry_count: req.user_retry.unwrap_or(1),
        user_delay_ms: req.user_delay_ms.unwrap_or(0),
        per_request_delay_ms: req.request_delay_ms.unwrap_or(0),
    };
    let user_count = options.users.len();

    let mut handle = orchestrator::spawn_batch_job(Arc::clone(&state.session_store), scraper, options);
    let cancel = Arc::clone(&handle.cancel);
    *running = Some(RunningJob { cancel });
    drop(running);

    let _ = state.events.send(ControllerEvent::Job(JobNotice::Started { user_count }));

    let events_tx = state.events.clone();
    let state_for_task = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(event) = handle.events.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = events_tx.send(ControllerEvent::Log(LogFrame {
                    stream: "stdout",
                    line,
                    parsed: Some(event),
                }));
            }
        }

        let notice = match handle.result().await {
            Ok(result) => JobNotice::Finished { result },
            Err(e) => {
                warn!("download job ended with an error: {e:#}");
                JobNotice::Error { message: e.to_string() }
            }
        };
        let _ = events_tx.send(ControllerEvent::Job(notice));
        *state_for_task.running.lock().await = None;
    });

    StatusCode::ACCEPTED.into_response()
}

async fn api_stop(State(state): State<SharedState>) -> (StatusCode, Json<serde_json::Value>) {
    let running = state.running.lock().await;
    match running.as_ref() {
        Some(job) => {
            job.cancel.cancel();
            (StatusCode::OK, Json(serde_json::json!({"stopped": true})))
        }
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({"stopped": false, "error": "no job running"}))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_state() -> Arc<SessionStore> {
        let dir = tempdir().unwrap();
        Arc::new(SessionStore::with_path(dir.path().join("session.json")))
    }

    #[tokio::test]
    async fn status_reports_not_running_initially() {
        let state: SharedState = Arc::new(AppState {
            session_store: test_state(),
            events: broadcast::channel(8).0,
            running: Mutex::new(None),
        });
        let response = api_status(State(state)).await;
        assert!(!response.0.running);
    }

    #[tokio::test]
    async fn stop_with_no_job_running_reports_not_found() {
        let state: SharedState = Arc::new(AppState {
            session_store: test_state(),
            events: broadcast::channel(8).0,
            running: Mutex::new(None),
        });
        let (status, _) = api_stop(State(state)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn login_request_defaults_strict_to_true() {
        let req: LoginRequest = serde_json::from_str(r#"{"cookies":"auth_token=A1; ct0=C1"}"#).unwrap();
        assert!(req.strict);
    }
}
