use std::sync::Arc;

use anyhow::{Context, Result};
use chat_client::{
    load_settings, ConversationSession, HttpHistoryLoader, SendOutcome, SessionSnapshot,
    SessionUpdate, WsConnector,
};
use clap::Parser;
use shared::domain::{ConversationKey, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, LinesStream},
    StreamExt,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Open one conversation and chat from the terminal. Lines typed on stdin are
/// sent; `/dismiss` clears notices and `/quit` leaves.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    local: String,
    #[arg(long)]
    remote: String,
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    ws_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(v) = args.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = args.ws_base_url {
        settings.ws_base_url = Some(v);
    }
    let endpoints = settings.endpoints()?;
    let key = ConversationKey::parse(&args.local, &args.remote)
        .context("both --local and --remote must be non-empty")?;

    let session = ConversationSession::open(
        key.clone(),
        Arc::new(HttpHistoryLoader::from_endpoints(&endpoints)),
        Arc::new(WsConnector::from_endpoints(&endpoints)),
    );
    let (snapshot, updates) = session.subscribe_with_snapshot();
    render_snapshot(&snapshot);
    let mut updates = BroadcastStream::new(updates);
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(Ok(update)) => render(&key, &update),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "terminal: fell behind session updates");
                }
                None => break,
            },
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if !handle_line(&session, &line) {
                        break;
                    }
                }
                Some(Err(err)) => return Err(err).context("failed to read stdin"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

/// Returns false when the user asked to leave.
fn handle_line(session: &ConversationSession, line: &str) -> bool {
    match line.trim() {
        "/quit" => return false,
        "/dismiss" => session.dismiss_notices(),
        _ => match session.send(line) {
            SendOutcome::Sent => {}
            SendOutcome::Rejected(reason) => {
                println!("-- not sent: {reason} ({}) --", session.status_text());
            }
        },
    }
    true
}

fn render_snapshot(snapshot: &SessionSnapshot) {
    println!(
        "Chat with {} ({})",
        snapshot.key.remote(),
        snapshot.status_text()
    );
    for message in &snapshot.messages {
        render_message(&snapshot.key, message);
    }
    for notice in [&snapshot.history_error, &snapshot.connection_notice]
        .into_iter()
        .flatten()
    {
        println!("!! {notice}");
    }
}

fn render_message(key: &ConversationKey, message: &Message) {
    let pending = if message.provenance().is_confirmed() {
        ""
    } else {
        " (sending)"
    };
    println!(
        "{}: {}{pending}",
        message.sender_label(key.local()),
        message.content()
    );
}

fn render(key: &ConversationKey, update: &SessionUpdate) {
    match update {
        SessionUpdate::MessageAppended(message) => render_message(key, message),
        SessionUpdate::StateChanged(state) => println!("-- {state} --"),
        SessionUpdate::HistoryLoaded { count } => {
            println!("-- {count} earlier messages --");
        }
        SessionUpdate::HistoryFailed(cause) => println!("!! {cause}"),
        SessionUpdate::ConnectionNotice(notice) => println!("!! {notice}"),
    }
}
