//! Terminal host for a talking-avatar session.
//!
//! Reads commands from stdin (`start`, `stop`, `retry`, `status`, `quit`),
//! prints status changes and conversation notices, and writes the rendered
//! avatar media to the files given on the command line.

use anyhow::Context;
use avatar_stream::{FileSink, NullSink, SharedSink, WsAvatarClientFactory, sink::shared};
use clap::Parser;
use convai_realtime::{
    ConvaiRestClient, FallbackIssuer, ProxyIssuer, SignedUrlIssuer, WsConversationConnector,
};
use facetalk_core::SessionSnapshot;
use facetalk_talker::{
    capture::{CaptureConstraints, CpalMicrophone},
    config::Config,
    session::{self, SessionHandle, SessionNotice, SessionParts, SessionSettings},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, watch},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a voice agent through a rendered avatar")]
struct Cli {
    /// Agent to talk to. Defaults to CONVAI_AGENT_ID.
    #[arg(long)]
    agent_id: Option<String>,
    /// Avatar face to render. Defaults to AVATAR_FACE_ID.
    #[arg(long)]
    face_id: Option<String>,
    /// Delay before the session starts on its own.
    #[arg(long, default_value_t = 1000)]
    auto_start_delay_ms: u64,
    /// Wait for a `start` command instead of starting automatically.
    #[arg(long)]
    no_auto_start: bool,
    /// File receiving the rendered video stream.
    #[arg(long)]
    video_out: Option<PathBuf>,
    /// File receiving the rendered audio stream.
    #[arg(long)]
    audio_out: Option<PathBuf>,
    /// Print the agents visible to the API key and exit.
    #[arg(long)]
    list_agents: bool,
}

fn media_sink(path: Option<&PathBuf>) -> anyhow::Result<SharedSink> {
    Ok(match path {
        Some(path) => shared(
            FileSink::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => shared(NullSink::default()),
    })
}

fn signed_url_issuer(config: &Config) -> Arc<dyn SignedUrlIssuer> {
    let direct: Arc<dyn SignedUrlIssuer> = Arc::new(ConvaiRestClient::new(
        config.convai_api_base.clone(),
        config.convai_api_key.clone(),
    ));
    match &config.signed_url_proxy {
        Some(origin) => {
            info!(proxy = %origin, "Issuing signed URLs through the proxy");
            Arc::new(FallbackIssuer::new(Arc::new(ProxyIssuer::new(origin)), direct))
        }
        None => direct,
    }
}

async fn print_notices(mut notices: broadcast::Receiver<SessionNotice>) {
    loop {
        match notices.recv().await {
            Ok(SessionNotice::UserTranscript(text)) => println!("you:   {text}"),
            Ok(SessionNotice::AgentResponse(text)) => println!("agent: {text}"),
            Ok(SessionNotice::Interrupted(_)) => println!("(agent interrupted)"),
            Ok(SessionNotice::ConversationEnded) => println!("(conversation ended)"),
            Ok(SessionNotice::Usage(level)) => println!("(usage) {}", level.message()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Notice printer fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_status(mut status: watch::Receiver<SessionSnapshot>) {
    let mut last_line = String::new();
    while status.changed().await.is_ok() {
        let line = status.borrow_and_update().status_line();
        if line != last_line {
            println!("[session] {line}");
            last_line = line;
        }
    }
}

async fn run_commands(handle: SessionHandle, agent_id: String, face_id: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match line.trim() {
            "" => continue,
            "start" => handle.start_session(&agent_id, &face_id).await,
            "stop" => handle.stop_session().await,
            "retry" => handle.retry().await,
            "status" => {
                println!("[session] {}", handle.snapshot().status_line());
                Ok(())
            }
            "quit" | "exit" => break,
            other => {
                println!("unknown command '{other}' (start, stop, retry, status, quit)");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("error: {e}");
        }
    }
    Ok(())
}

/// Listens for the `Ctrl+C` signal.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    if cli.list_agents {
        let client = ConvaiRestClient::new(config.convai_api_base.clone(), config.convai_api_key.clone());
        for agent in client.list_agents().await {
            println!("{}\t{}", agent.agent_id, agent.name.unwrap_or_default());
        }
        return Ok(());
    }

    let agent_id = cli.agent_id.clone().unwrap_or_else(|| config.agent_id.clone());
    let face_id = cli.face_id.clone().unwrap_or_else(|| config.face_id.clone());

    // --- 3. Wire the Session ---
    let connector = WsConversationConnector::new(signed_url_issuer(&config))
        .with_connect_timeout(config.connect_timeout)
        .with_system_prompt(config.system_prompt.clone());
    let parts = SessionParts {
        avatar: Arc::new(WsAvatarClientFactory::new(
            config.avatar_ws_url.clone(),
            config.connect_timeout,
        )),
        conversation: Arc::new(connector),
        microphone: Arc::new(CpalMicrophone::new(CaptureConstraints::default())),
    };
    let settings = SessionSettings {
        avatar_api_key: config.avatar_api_key.clone(),
        handle_silence: true,
        avatar_connect_timeout: config.avatar_connect_timeout,
        settle_delay: config.settle_delay,
        retry: config.retry,
        priming_bytes: config.priming_bytes,
        voice_gate: config.voice_gate,
        video_sink: media_sink(cli.video_out.as_ref())?,
        audio_sink: media_sink(cli.audio_out.as_ref())?,
    };
    let handle = session::spawn(settings, parts);
    info!(agent_id = %agent_id, face_id = %face_id, "Session orchestrator running");

    tokio::spawn(print_notices(handle.subscribe_notices()));
    tokio::spawn(print_status(handle.subscribe_status()));

    if !cli.no_auto_start {
        let handle = handle.clone();
        let (agent_id, face_id) = (agent_id.clone(), face_id.clone());
        let delay = Duration::from_millis(cli.auto_start_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = handle.start_session(&agent_id, &face_id).await {
                println!("error: {e}");
            }
        });
    }

    // --- 4. Run Until Quit ---
    tokio::select! {
        result = run_commands(handle.clone(), agent_id, face_id) => result?,
        _ = shutdown_signal() => {}
    }

    handle.stop_session().await?;
    info!("Session stopped.");
    Ok(())
}
