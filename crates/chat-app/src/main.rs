use std::env;
use std::path::PathBuf;
use std::time::Duration;

use parley::{LiveIngest, SessionHandle, SettingsStore};
use parley_api::{FetchError, create_api, decode_incoming_message};
use parley_session::{SessionSnapshot, SyncError};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    session_id: String,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("missing required --session argument"))]
    MissingSession { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("failed to create chat api client: {source}"))]
    CreateApi {
        stage: &'static str,
        source: FetchError,
    },
    #[snafu(display("session coordinator rejected `{stage}`: {source}"))]
    Session {
        stage: &'static str,
        source: SyncError,
    },
    #[snafu(display("failed to read live messages from stdin: {source}"))]
    ReadStdin {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to encode snapshot: {source}"))]
    EncodeSnapshot {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("snapshot printer stopped unexpectedly: {source}"))]
    PrinterTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

type CliResult<T> = Result<T, CliError>;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("parley: {error}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let args = parse_args(env::args().skip(1))?;
    let store = match args.config_path {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = store.settings();
    init_tracing(&settings.log_filter);
    if let Some(error) = store.load_error() {
        tracing::warn!(config_path = ?store.config_path(), error, "settings file unreadable, using defaults and environment");
    }
    tracing::info!(config_path = ?store.config_path(), api_host = %settings.api_host, "settings loaded");
    if !settings.has_token() {
        tracing::warn!("no token configured, requests will carry an empty bearer credential");
    }

    let api = create_api(settings.to_api_config()).context(CreateApiSnafu {
        stage: "create-api",
    })?;
    let handle = SessionHandle::spawn(api);
    let printer = tokio::spawn(print_snapshots(handle.subscribe()));

    let epoch = handle
        .begin_session(&args.session_id, settings.credential())
        .context(SessionSnafu {
            stage: "begin-session",
        })?;

    let stdin = BufReader::new(tokio::io::stdin());
    let forwarded = forward_lines(stdin, &handle.ingest()).await?;
    tracing::info!(forwarded, "stdin closed");

    let settle_within = Duration::from_secs(settings.request_timeout_secs);
    match tokio::time::timeout(settle_within, handle.wait_settled(epoch)).await {
        Ok(Ok(_)) => tracing::info!(epoch = %epoch, "session settled, shutting down"),
        Ok(Err(error)) => tracing::warn!(error = %error, "runtime stopped before the session settled"),
        Err(_) => tracing::warn!(
            timeout_secs = settings.request_timeout_secs,
            "session did not settle in time, shutting down"
        ),
    }

    // Dropping the last handle stops the runtime, which closes the snapshot channel.
    drop(handle);
    printer.await.context(PrinterTaskSnafu {
        stage: "join-snapshot-printer",
    })?
}

fn parse_args(args: impl IntoIterator<Item = String>) -> CliResult<CliArgs> {
    let mut session_id = None;
    let mut config_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--session" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-session-value",
                    arg: "--session",
                })?;
                session_id = Some(value);
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(CliArgs {
        session_id: session_id.context(MissingSessionSnafu {
            stage: "parse-args-session-required",
        })?,
        config_path,
    })
}

fn init_tracing(log_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    // Stdout carries snapshot lines only.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn print_snapshots(mut snapshots: watch::Receiver<SessionSnapshot>) -> CliResult<()> {
    loop {
        let line = {
            let snapshot = snapshots.borrow_and_update();
            serde_json::to_string(&*snapshot).context(EncodeSnapshotSnafu {
                stage: "encode-snapshot",
            })?
        };
        println!("{line}");

        if snapshots.changed().await.is_err() {
            return Ok(());
        }
    }
}

/// Forwards one live event per line, `{"sessionId": .., "message": {..}}` in the server's
/// message shape, until EOF. Malformed lines are skipped.
async fn forward_lines<R>(reader: R, ingest: &LiveIngest) -> CliResult<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0_u64;

    while let Some(line) = lines.next_line().await.context(ReadStdinSnafu {
        stage: "read-stdin-line",
    })? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match decode_incoming_message(line) {
            Ok(incoming) => {
                ingest.on_incoming_message(incoming).context(SessionSnafu {
                    stage: "forward-live-message",
                })?;
                forwarded += 1;
            }
            Err(error) => {
                tracing::warn!(error = %error, "skipping malformed live event line");
            }
        }
    }

    Ok(forwarded)
}
