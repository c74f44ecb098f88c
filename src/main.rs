use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use realtime_voice_client::SessionSettings;
use realtime_voice_client::core::realtime::{
    Direction, NoMediaSource, RealtimeSession, SessionHandle, SessionNotice, SessionNotices,
    TransportFactory,
};

/// Realtime voice client - talk to a realtime model from the terminal
#[derive(Parser, Debug)]
#[command(name = "realtime-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start a session immediately instead of waiting for `/start`
    #[arg(long)]
    start: bool,
}

#[cfg(feature = "webrtc")]
fn transport_factory(settings: &SessionSettings) -> anyhow::Result<Arc<dyn TransportFactory>> {
    use realtime_voice_client::core::realtime::WebRtcTransportFactory;

    Ok(Arc::new(WebRtcTransportFactory::new(
        settings.data_channel_label.clone(),
    )))
}

#[cfg(not(feature = "webrtc"))]
fn transport_factory(_settings: &SessionSettings) -> anyhow::Result<Arc<dyn TransportFactory>> {
    Err(anyhow!(
        "`realtime-voice` requires the `webrtc` feature. \
         Rebuild with `--features webrtc` to open live sessions."
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SessionSettings::from_file(path)
        }
        None => SessionSettings::from_env(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {e}"))?;

    let factory = transport_factory(&settings)?;
    let (session, handle, notices) =
        RealtimeSession::from_settings(&settings, factory, Arc::new(NoMediaSource))?;

    let session_task = tokio::spawn(session.run());
    tokio::spawn(print_notices(notices));

    info!(
        model = %settings.model,
        voice = %settings.voice,
        "Ready. Commands: /start, /stop, /dismiss, /quit; anything else is sent as text"
    );
    if cli.start {
        handle.start()?;
    }

    read_commands(&handle).await?;
    let _ = handle.shutdown();
    session_task.await?;
    Ok(())
}

async fn read_commands(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/start" => handle.start()?,
            "/stop" => handle.stop()?,
            "/dismiss" => handle.dismiss_tool()?,
            "/quit" => break,
            text => handle.send_text(text)?,
        }
    }
    Ok(())
}

async fn print_notices(mut notices: SessionNotices) {
    while let Some(notice) = notices.recv().await {
        match notice {
            SessionNotice::StateChanged { state, .. } => println!("* session {state}"),
            SessionNotice::EventLogged(event) => {
                let arrow = match event.direction {
                    Direction::Inbound => "<-",
                    Direction::Outbound => "->",
                };
                let event_id = event.event_id.as_deref().unwrap_or("-");
                println!("{arrow} {} ({event_id})", event.event_type);
            }
            SessionNotice::ToolInvoked(invocation) => {
                println!("* {} {}", invocation.tool_name, invocation.arguments);
            }
            SessionNotice::ToolDismissed { reason, .. } => println!("* tool dismissed: {reason}"),
            SessionNotice::Diagnostic(e) => eprintln!("! {e}"),
        }
    }
}
