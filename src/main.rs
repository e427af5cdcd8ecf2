//! `twmd`: batch media harvester for Twitter/X-like platforms.
//!
//! Thin CLI driver over the `twmd` library: parses arguments, wires up
//! logging, dispatches to a `commands::*` module, and translates the
//! resulting `ErrorKind` into the exit codes and error-line format §7
//! specifies.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use twmd::commands::download::{DownloadArgs, Engine};
use twmd::commands::{download, gui, login, logout, whoami};
use twmd::error::ErrorKind;
use twmd::model::MediaKind;
use twmd::session::SessionStore;

const APP_NAME: &str = "twmd";

#[derive(Parser)]
#[command(name = "twmd", version, about = "Batch media harvester for Twitter/X-like platforms")]
struct Cli {
    /// Suppress info-level progress output (warnings and errors still print).
    #[arg(long, global = true)]
    quiet: bool,

    /// Disable ANSI color in log output.
    #[arg(long, global = true)]
    no_color: bool,

    /// Output format for progress events and the final error line.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a session from exported cookies (file or standard input).
    Login {
        /// Path to a cookie export file; reads standard input when omitted.
        #[arg(long)]
        cookie_file: Option<PathBuf>,

        /// Require `auth_token` and `ct0` to be present.
        #[arg(long, default_value_t = true)]
        strict: bool,
    },

    /// Report whether a valid session is saved, without revealing cookie values.
    Whoami,

    /// Remove the saved session.
    Logout,

    /// Fetch media for one or more accounts.
    Download {
        /// Comma-separated account handles.
        #[arg(long, env = "TWMD_USERS")]
        users: Option<String>,

        /// Path to a file of account handles, one per line.
        #[arg(long, env = "TWMD_USERS_FILE")]
        users_file: Option<PathBuf>,

        /// Output directory for downloaded media.
        #[arg(long, env = "TWMD_OUT_DIR")]
        out: PathBuf,

        /// Comma-separated media kinds to keep (image,video,gif).
        #[arg(long, env = "TWMD_KINDS", default_value = "image,video,gif")]
        kinds: String,

        /// Maximum tweets considered per account.
        #[arg(long, env = "TWMD_MAX_TWEETS", default_value_t = 200)]
        max_tweets: usize,

        /// Maximum concurrent downloads.
        #[arg(long, env = "TWMD_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Per-item download retry count.
        #[arg(long, env = "TWMD_RETRY", default_value_t = 2)]
        retry: u32,

        /// Per-account retry count.
        #[arg(long, env = "TWMD_USER_RETRY", default_value_t = 1)]
        user_retry: u32,

        /// Delay between accounts, in milliseconds.
        #[arg(long, env = "TWMD_USER_DELAY_MS", default_value_t = 0)]
        user_delay_ms: u64,

        /// Delay between requests, in milliseconds.
        #[arg(long, env = "TWMD_REQUEST_DELAY_MS", default_value_t = 0)]
        request_delay_ms: u64,

        /// Scraping engine.
        #[arg(long, env = "TWMD_ENGINE", value_enum, default_value_t = Engine::Graphql)]
        engine: Engine,

        /// Write a JSON report to this path.
        #[arg(long, env = "TWMD_JSON_REPORT")]
        json_report: Option<PathBuf>,

        /// Write a CSV report to this path.
        #[arg(long, env = "TWMD_CSV_REPORT")]
        csv_report: Option<PathBuf>,

        /// Write a failures-only JSON report to this path.
        #[arg(long, env = "TWMD_FAILURES_REPORT")]
        failures_report: Option<PathBuf>,
    },

    /// Start the HTTP/SSE controller for a local browser UI.
    Gui {
        /// Address to bind, e.g. 127.0.0.1:8787.
        #[arg(long, env = "TWMD_GUI_BIND", default_value = "127.0.0.1:8787")]
        bind: String,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.quiet, cli.no_color);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            emit_error(&ErrorKind::Internal(anyhow::Error::new(e)), cli.output_format);
            return ExitCode::from(5);
        }
    };

    let output_format = cli.output_format;
    let result = runtime.block_on(run(cli));
    match result {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            let code = err.exit_code();
            emit_error(&err, output_format);
            ExitCode::from(code as u8)
        }
    }
}

fn init_tracing(quiet: bool, no_color: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .init();
}

fn emit_error(err: &ErrorKind, format: OutputFormat) {
    let code = err.exit_code();
    match format {
        OutputFormat::Text => {
            eprintln!("Error [{}] (exit={code}): {err}", error_code_name(err));
        }
        OutputFormat::Json => {
            let line = serde_json::json!({
                "level": "error",
                "code": error_code_name(err),
                "exitCode": code,
                "message": err.to_string(),
            });
            eprintln!("{line}");
        }
    }
}

fn error_code_name(err: &ErrorKind) -> &'static str {
    match err {
        ErrorKind::Usage(_) => "usage",
        ErrorKind::Auth(_) => "auth",
        ErrorKind::Partial(_) => "partial",
        ErrorKind::Internal(_) => "internal",
    }
}

async fn run(cli: Cli) -> Result<(), ErrorKind> {
    let store = Arc::new(SessionStore::new(APP_NAME).map_err(ErrorKind::Internal)?);
    let output_format_json = cli.output_format == OutputFormat::Json;

    match cli.command {
        Commands::Login { cookie_file, strict } => {
            login::execute(&store, cookie_file.as_deref(), strict)?;
            Ok(())
        }
        Commands::Whoami => {
            let who = whoami::execute(&store)?;
            if output_format_json {
                println!("{}", serde_json::json!({"loggedIn": who.logged_in, "updatedAt": who.updated_at}));
            } else if who.logged_in {
                println!("logged in (updated {})", who.updated_at.unwrap_or_default());
            } else {
                println!("not logged in");
            }
            Ok(())
        }
        Commands::Logout => {
            logout::execute(&store)?;
            Ok(())
        }
        Commands::Download {
            users,
            users_file,
            out,
            kinds,
            max_tweets,
            concurrency,
            retry,
            user_retry,
            user_delay_ms,
            request_delay_ms,
            engine,
            json_report,
            csv_report,
            failures_report,
        } => {
            let account_handles = download::parse_users(users.as_deref(), users_file.as_deref())?;
            let kinds = parse_kinds(&kinds)?;

            download::execute(
                store,
                DownloadArgs {
                    users: account_handles,
                    output_dir: out,
                    kinds,
                    max_tweets,
                    concurrency,
                    retry,
                    user_retry,
                    user_delay_ms,
                    request_delay_ms,
                    engine,
                    json_report,
                    csv_report,
                    failures_report,
                    output_format_json,
                },
            )
            .await
        }
        Commands::Gui { bind } => gui::execute(store, &bind).await.map_err(ErrorKind::Internal),
    }
}

fn parse_kinds(raw: &str) -> Result<Vec<MediaKind>, ErrorKind> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| MediaKind::parse(s).ok_or_else(|| ErrorKind::Usage(format!("unknown media kind: {s}"))))
        .collect()
}
