use thiserror::Error;

/// Stable error classes the CLI driver maps to process exit codes.
///
/// Variant order matches the precedence used when multiple classes could
/// plausibly apply: usage mistakes are reported before auth problems, which
/// are reported before a job being merely partially successful.
#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("job completed with failures: {0}")]
    Partial(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ErrorKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Usage(_) => 2,
            ErrorKind::Auth(_) => 3,
            ErrorKind::Partial(_) => 4,
            ErrorKind::Internal(_) => 5,
        }
    }

    /// Map a job failure to an [`ErrorKind`], special-casing a missing
    /// headless-browser executable (the one precondition failure the spec
    /// calls out by name) to `Usage` with an install hint rather than the
    /// generic `Internal` every other orchestrator precondition violation
    /// gets.
    pub fn from_job_failure(e: anyhow::Error) -> ErrorKind {
        let message = format!("{e:#}").to_ascii_lowercase();
        let looks_like_missing_browser = (message.contains("executable") || message.contains("chrome"))
            && (message.contains("not found")
                || message.contains("no such file")
                || message.contains("could not auto detect"));
        if looks_like_missing_browser {
            ErrorKind::Usage(
                "no headless browser executable found; install Chrome/Chromium or retry with --engine graphql"
                    .to_string(),
            )
        } else {
            ErrorKind::Internal(e)
        }
    }
}

/// Errors raised by the scraping layer. Distinguished from [`ErrorKind`]
/// because callers need to pattern-match on *why* a scrape failed (to decide
/// whether to rotate credentials or give up) before it is ever turned into a
/// user-facing exit code.
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("account @{0} not found")]
    UserNotFound(String),

    #[error("all auth triples exhausted for @{0}")]
    AuthExhausted(String),

    #[error("no media found for @{0} via any endpoint")]
    NoInventory(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
