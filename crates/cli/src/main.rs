//! The `vitalis` binary.
//!
//! `vitalis serve` runs the HTTP gateway with the full event pipeline;
//! `vitalis chat` runs a single turn in the terminal. Both wire the
//! stub generation endpoint — production deployments inject a real
//! `TextGenerator` at the library level.

mod stub;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use vitalis_agent::{TurnEngine, TurnMessage};
use vitalis_config::AppConfig;
use vitalis_core::conversation::{ConversationId, Role};
use vitalis_core::event::EventBus;
use vitalis_gateway::{router, AppState, StreamMultiplexer, TurnRunner};
use vitalis_runtime::{InMemoryStore, PersistenceBuffer, StateTracker};

#[derive(Parser)]
#[command(name = "vitalis", version, about = "Conversational health-assistant runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Path to a config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the listen host.
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one turn in the terminal.
    Chat {
        /// The user message.
        message: String,
        /// Path to a config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(&path).context("loading config file"),
        None => AppConfig::from_env().context("building config from environment"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Command::Chat { message, config } => {
            let config = load_config(config)?;
            chat(config, &message).await
        }
    }
}

/// Wire the full pipeline: bus, engine, runner, trackers, persistence,
/// multiplexer, and the axum surface.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::default());
    let tools = Arc::new(vitalis_tools::default_registry());

    let engine = TurnEngine::new(Arc::new(stub::StubEndpoint::new()), tools.clone())
        .with_max_iterations(config.engine.max_iterations)
        .with_scratchpad_max_entries(config.engine.scratchpad_max_entries);
    let runner = Arc::new(TurnRunner::new(engine, bus.clone()));

    let store = Arc::new(InMemoryStore::new());
    let buffer = PersistenceBuffer::new(store.clone(), store.clone());
    buffer.spawn(
        &bus,
        Duration::from_secs(config.persistence.flush_interval_secs),
    );

    let (_tracker, _tracker_task) = StateTracker::spawn(
        &bus,
        chrono::Duration::seconds(config.tracking.tool_record_grace_secs as i64),
        chrono::Duration::seconds(config.tracking.conversation_grace_secs as i64),
        Duration::from_secs(30),
    );

    let multiplexer = StreamMultiplexer::new(
        Duration::from_secs(config.gateway.heartbeat_secs),
        Duration::from_secs(config.gateway.idle_timeout_secs),
    );
    multiplexer.attach(&bus);

    let state = AppState::new(runner, multiplexer, tools);
    let app = router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "vitalis gateway listening");
    axum::serve(listener, app).await.context("serving")
}

/// Run a single turn and print the result.
async fn chat(config: AppConfig, message: &str) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::default());
    let tools = Arc::new(vitalis_tools::default_registry());
    let engine = TurnEngine::new(Arc::new(stub::StubEndpoint::new()), tools)
        .with_max_iterations(config.engine.max_iterations);
    let runner = TurnRunner::new(engine, bus);

    let outcome = runner
        .run(
            ConversationId::new(),
            "terminal",
            vec![TurnMessage {
                role: Role::User,
                content: message.to_string(),
            }],
        )
        .await;

    if let Some(answer) = &outcome.answer {
        println!("{answer}");
    } else if let Some(apology) = &outcome.fallback_response {
        println!("{apology}");
    }
    info!(
        iterations = outcome.iterations,
        tools = ?outcome.tools_used,
        "turn complete"
    );
    Ok(())
}
