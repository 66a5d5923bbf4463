use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Parser)]
#[command(
    name = "camsentryctl",
    author,
    version,
    about = "Operator CLI for a running camsentry control surface"
)]
struct Cli {
    /// Base URL of the camsentry HTTP control surface.
    #[arg(long, env = "CAMSENTRY_URL", default_value = DEFAULT_BASE_URL)]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Aggregate fleet/disk/process status.
    Status,
    /// Start one source (`<id>`) or every source (`all`).
    Start { target: String },
    /// Stop one source (`<id>`) or every source (`all`).
    Stop { target: String },
    /// Restart one source (`<id>`) or every source (`all`).
    Restart { target: String },
    /// Storage usage and re-encoder statistics.
    Stats,
    /// Run an age-based cleanup pass.
    Cleanup {
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect or toggle the re-encoder engine.
    Transcode {
        #[command(subcommand)]
        action: TranscodeAction,
    },
}

#[derive(Debug, Subcommand)]
enum TranscodeAction {
    Stats,
    Enable,
    Disable,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Exit code 1: request never reached the server or was malformed on our
/// side. Exit code 2: the server accepted the request and reported an
/// operational failure.
enum CliError {
    Validation(String),
    Operational(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match run(&client, &cli.url, cli.command).await {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Validation(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Operational(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(2)
        }
    }
}

async fn run(client: &reqwest::Client, base_url: &str, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status => print_get(client, base_url, "/api/status").await,
        Command::Stats => {
            print_get(client, base_url, "/api/storage").await?;
            print_get(client, base_url, "/api/transcoding/status").await
        }
        Command::Start { target } => dispatch_bulk_aware(client, base_url, &target, "start").await,
        Command::Stop { target } => dispatch_bulk_aware(client, base_url, &target, "stop").await,
        Command::Restart { target } => dispatch_bulk_aware(client, base_url, &target, "restart").await,
        Command::Cleanup { dry_run } => {
            let body = serde_json::json!({ "dry_run": dry_run });
            print_post(client, base_url, "/api/storage/cleanup", Some(body)).await
        }
        Command::Transcode { action } => match action {
            TranscodeAction::Stats => print_get(client, base_url, "/api/transcoding/status").await,
            TranscodeAction::Enable => print_post(client, base_url, "/api/transcoding/enable", None).await,
            TranscodeAction::Disable => print_post(client, base_url, "/api/transcoding/disable", None).await,
        },
    }
}

/// `start`/`stop`/`restart` each take `<id>` or the literal `all`; the
/// per-source and fleet-wide endpoints have different paths, so this picks
/// the right one before delegating to `print_post`.
async fn dispatch_bulk_aware(
    client: &reqwest::Client,
    base_url: &str,
    target: &str,
    verb: &str,
) -> Result<(), CliError> {
    if target.is_empty() {
        return Err(CliError::Validation("target must be a source id or `all`".to_string()));
    }

    let path = if target == "all" {
        match verb {
            "start" => "/api/start_all".to_string(),
            "stop" => "/api/stop_all".to_string(),
            "restart" => "/api/system/restart_cameras".to_string(),
            _ => unreachable!(),
        }
    } else {
        format!("/api/camera/{target}/{verb}")
    };

    print_post(client, base_url, &path, None).await
}

async fn print_get(client: &reqwest::Client, base_url: &str, path: &str) -> Result<(), CliError> {
    let resp = client
        .get(format!("{base_url}{path}"))
        .send()
        .await
        .map_err(|e| CliError::Validation(format!("request to {path} failed: {e}")))?;
    handle_response(resp).await
}

async fn print_post(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: Option<Value>,
) -> Result<(), CliError> {
    let mut req = client.post(format!("{base_url}{path}"));
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| CliError::Validation(format!("request to {path} failed: {e}")))?;
    handle_response(resp).await
}

async fn handle_response(resp: reqwest::Response) -> Result<(), CliError> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| CliError::Operational(format!("failed to read response body: {e}")))?;

    if status.is_success() {
        println!("{text}");
        return Ok(());
    }

    match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => Err(CliError::Operational(format!(
            "{} ({})",
            envelope.error.message, envelope.error.code
        ))),
        Err(_) => Err(CliError::Operational(format!("http {status}: {text}"))),
    }
}
