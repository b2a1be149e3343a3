use std::time::Duration;

use anyhow::{Context, Result};
use chargeback_client::{ClaimSession, ConnectRequest, DiskFile, Message};
use chargeback_proto::{ClaimId, InboundMessage, ServerError};
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

mod cli;
mod telemetry;

use cli::{Cli, Command};

/// Outbound frames are written by a background task; give it a moment
/// before the runtime shuts down.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init()?;

    let config = cli.client_config();
    info!(base_url = %config.base_url(), "chargeback client starting");
    let session = ClaimSession::new(config).context("failed to build claim session")?;

    match cli.command {
        Command::Login { uuid } => {
            let id = session.login(uuid.as_deref()).await.context("login failed")?;
            println!("{id}");
        }
        Command::StartClaim { attrs } => {
            let claim = session
                .start_new_claim(&cli::attributes(&attrs))
                .await
                .context("failed to start claim")?;
            println!("{claim}");
        }
        Command::History { claim } => {
            session
                .load_history(claim)
                .await
                .with_context(|| format!("failed to load history for claim {claim}"))?;
            for message in session.timeline() {
                print_message(&message);
            }
        }
        Command::MerchantView { claim } => {
            let view = session
                .get_merchant_view(claim)
                .await
                .with_context(|| format!("failed to load merchant view for claim {claim}"))?;
            println!("{view}");
        }
        Command::Summary { claim } => {
            let summary = session
                .fetch_structured_data(claim)
                .await
                .with_context(|| format!("failed to fetch summary for claim {claim}"))?;
            println!("{}", serde_json::to_string_pretty(&*summary)?);
        }
        Command::Chat { claim, details } => run_chat(&session, claim, details).await?,
        Command::Upload { claim, path } => {
            let file = DiskFile::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            session.connect(claim).await.context("failed to connect")?;
            let result = session
                .upload_file_with_progress(claim, &file, |progress| {
                    eprint!("\ruploading: {:>5.1}%", progress * 100.0);
                })
                .await;
            eprintln!();
            let report = result.context("upload failed")?;
            println!(
                "uploaded {} in {} chunks ({} bytes)",
                path.display(),
                report.chunks_sent,
                report.bytes_sent
            );
            tokio::time::sleep(FLUSH_GRACE).await;
            session.disconnect();
        }
        Command::Merchant { claim, text } => {
            session
                .connect_as_merchant(claim)
                .await
                .context("failed to connect as merchant")?;
            session
                .send_merchant_response(text)
                .context("failed to send merchant response")?;
            tokio::time::sleep(FLUSH_GRACE).await;
            session.disconnect();
        }
    }

    Ok(())
}

async fn run_chat(session: &ClaimSession, claim: ClaimId, details: Option<String>) -> Result<()> {
    session
        .load_history(claim)
        .await
        .with_context(|| format!("failed to load history for claim {claim}"))?;
    for message in session.timeline() {
        print_message(&message);
    }

    let mut request = ConnectRequest::new(claim);
    if let Some(details) = details {
        let details: Value =
            serde_json::from_str(&details).context("--details must be valid JSON")?;
        request = request.with_transaction_details(details);
    }

    let _pushes = session.on_message(|message: &InboundMessage| {
        println!("Adjudicator: {}", message.text);
        if !message.options.is_empty() {
            println!("  options: {}", message.options.join(" | "));
        }
    });
    let _errors = session.on_server_error(|error: &ServerError| {
        eprintln!("server error: {}", error.message);
    });
    let _summary = session.add_watcher(|snapshot: &Value| {
        if let Some(status) = snapshot.get("status").and_then(Value::as_str) {
            eprintln!("[claim status: {status}]");
        }
    });

    session
        .connect_with(request)
        .await
        .with_context(|| format!("failed to connect to claim {claim}"))?;
    eprintln!("connected to claim {claim}; type a reply, /quit to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(err) = session.send_message(line) {
                    warn!(error = %err, "message not sent");
                    if err.is_not_connected() {
                        eprintln!("connection lost");
                        break;
                    }
                }
            }
            _ = signal::ctrl_c() => break,
        }
    }

    session.disconnect();
    Ok(())
}

fn print_message(message: &Message) {
    if message.timestamp.is_empty() {
        println!("{}: {}", message.author, message.content);
    } else {
        println!("[{}] {}: {}", message.timestamp, message.author, message.content);
    }
}
