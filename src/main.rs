//! CLI entry point for turnsync.

use clap::Parser;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use turnsync::api::{decode_event_payload, OpencodeClient, SessionQuery, SseEventSource};
use turnsync::cli::{Args, Command};
use turnsync::config::{load_config_with_diagnostics, Config};
use turnsync::engine::{no_response_payload, run_turn, TurnOptions, TurnResult, TurnSource};
use turnsync::error::{ConfigError, EngineError};
use turnsync::merge::has_renderable;
use turnsync::reducer::{consume_stream, StreamEvent, StreamOptions, TurnReducer, TurnUpdate};

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("ctrl-c received, cancelling turn");
            let _ = cancel_tx.send(true);
        }
    });

    let json = args.json;
    let code = match run(args.command, &config, json, cancel_rx).await {
        Ok(()) => 0,
        Err(CliError::Engine(EngineError::Cancelled)) => {
            eprintln!("cancelled");
            130
        }
        Err(CliError::Engine(EngineError::NoResponse { last_status })) => {
            if json {
                print_json(&ResultLine {
                    kind: "no_response",
                    payload: &no_response_payload(&last_status),
                    timed_out: true,
                    source: None,
                });
            } else {
                eprintln!("{}", no_response_payload(&last_status).text);
            }
            1
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

/// `TURNSYNC_LOG` wins over `RUST_LOG`; logs always go to stderr.
fn init_logging() {
    let filter = std::env::var("TURNSYNC_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load(args: &Args) -> Result<Config, ConfigError> {
    let loaded = load_config_with_diagnostics(args.config.as_deref())?;
    tracing::debug!(origin = ?loaded.origin, "configuration loaded");
    for warning in &loaded.diagnostics.warnings {
        tracing::warn!("{warning}");
    }
    let mut config = loaded.config;
    if let Some(url) = &args.base_url {
        config.server.base_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(directory) = &args.directory {
        config.server.directory = Some(directory.clone());
    }
    Ok(config)
}

async fn run(
    command: Command,
    config: &Config,
    json: bool,
    cancel_rx: watch::Receiver<bool>,
) -> Result<(), CliError> {
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(update_rx, json);

    let result = match command {
        Command::Replay {
            events,
            session,
            started_at,
        } => replay(&events, session, started_at, &cancel_rx, &update_tx).await,
        Command::Watch { session, message } => {
            let client = Arc::new(OpencodeClient::new(&config.server));
            let mut source = SseEventSource::connect(Arc::clone(&client))
                .await
                .map_err(EngineError::Api)?;
            // A pinned message may predate this process; otherwise follow the next turn.
            let started_at = if message.is_some() { 0 } else { now_ms() };
            let mut options = TurnOptions::from_config(config, session.clone(), started_at);
            options.finalize.message_id = message;
            let query = SessionQuery::new(client, session);
            run_turn(&mut source, &query, options, &cancel_rx, Some(&update_tx))
                .await
                .map_err(CliError::from)
        }
        Command::Ask { session, prompt } => {
            let client = Arc::new(OpencodeClient::new(&config.server));
            let mut source = SseEventSource::connect(Arc::clone(&client))
                .await
                .map_err(EngineError::Api)?;
            let started_at = now_ms();
            client
                .prompt_async(&session, &prompt)
                .await
                .map_err(EngineError::Api)?;
            tracing::debug!(session = %session, "prompt sent");
            let options = TurnOptions::from_config(config, session.clone(), started_at);
            let query = SessionQuery::new(client, session);
            run_turn(&mut source, &query, options, &cancel_rx, Some(&update_tx))
                .await
                .map_err(CliError::from)
        }
    };

    drop(update_tx);
    let printed = printer.await.unwrap_or_default();
    let result = result?;
    tracing::debug!(
        source = ?result.source,
        timed_out = result.timed_out,
        completed = result.payload.completed,
        "turn settled"
    );
    print_result(&result, &printed, json);
    Ok(())
}

/// Fold a recorded event log through the reducer without any server.
async fn replay(
    path: &Path,
    session: Option<String>,
    started_at: u64,
    cancel_rx: &watch::Receiver<bool>,
    sink: &mpsc::UnboundedSender<TurnUpdate>,
) -> Result<TurnResult, CliError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::Input(format!("{}: {e}", path.display())))?;
    let events = parse_event_log(&text);
    let session = session
        .or_else(|| events.iter().find_map(|e| e.session_id().map(str::to_string)))
        .ok_or_else(|| CliError::Input(format!("{}: no session events", path.display())))?;
    tracing::debug!(session = %session, events = events.len(), "replaying event log");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StreamEvent>();
    for event in events {
        let _ = event_tx.send(event);
    }
    drop(event_tx);

    let mut reducer = TurnReducer::new(session, started_at);
    let mut cancel_rx = cancel_rx.clone();
    let outcome = consume_stream(
        &mut reducer,
        &mut event_rx,
        &mut cancel_rx,
        Some(sink),
        None,
        &StreamOptions::default(),
    )
    .await?;
    if !has_renderable(&outcome.payload) {
        return Err(EngineError::NoResponse {
            last_status: format!("{:?}", outcome.end).to_lowercase(),
        }
        .into());
    }
    Ok(TurnResult {
        payload: outcome.payload,
        timed_out: false,
        source: TurnSource::Stream,
    })
}

/// One envelope per line; blank and undecodable lines are skipped.
fn parse_event_log(text: &str) -> Vec<StreamEvent> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            let event = decode_event_payload(line);
            if event.is_none() {
                tracing::warn!(line = index + 1, "skipping undecodable event line");
            }
            event
        })
        .collect()
}

fn spawn_printer(mut rx: mpsc::UnboundedReceiver<TurnUpdate>, json: bool) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut printed = String::new();
        while let Some(update) = rx.recv().await {
            if json {
                print_json(&update);
                continue;
            }
            match update {
                TurnUpdate::Token { text, .. } => {
                    // Rewrites are left for the final print.
                    if let Some(fresh) = text.strip_prefix(printed.as_str()) {
                        let mut stdout = std::io::stdout();
                        let _ = stdout.write_all(fresh.as_bytes());
                        let _ = stdout.flush();
                        printed = text;
                    }
                }
                TurnUpdate::PermissionRequest { id, .. } => {
                    eprintln!("[permission requested: {id}]");
                }
                TurnUpdate::QuestionRequest { id, .. } => {
                    eprintln!("[question waiting for an answer: {id}]");
                }
                TurnUpdate::Toast { payload } => {
                    if let Some(message) = payload.get("message").and_then(|m| m.as_str()) {
                        eprintln!("[{message}]");
                    }
                }
                _ => {}
            }
        }
        printed
    })
}

#[derive(Serialize)]
struct ResultLine<'a> {
    kind: &'static str,
    payload: &'a turnsync::types::Payload,
    timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<TurnSource>,
}

fn print_result(result: &TurnResult, printed: &str, json: bool) {
    if json {
        print_json(&ResultLine {
            kind: "result",
            payload: &result.payload,
            timed_out: result.timed_out,
            source: Some(result.source),
        });
        return;
    }
    let text = &result.payload.text;
    match text.strip_prefix(printed) {
        Some(rest) => println!("{rest}"),
        None => {
            println!();
            println!("{text}");
        }
    }
    if result.timed_out {
        eprintln!("(timed out before the turn completed)");
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize output line"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
enum CliError {
    Engine(EngineError),
    Input(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "{e}"),
            Self::Input(msg) => write!(f, "input: {msg}"),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}
