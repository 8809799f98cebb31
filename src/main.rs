//! idea-relay: streams a chat completion to browsers as Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! # Relay with the mock backend
//! idea-relay serve
//!
//! # Relay OpenAI with a config file
//! OPENAI_API_KEY=sk-... idea-relay serve config/relay.toml --backend openai
//!
//! # Watch a relay from the terminal
//! idea-relay watch --url http://127.0.0.1:3000/api/ideas
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use idea_relay::{
    backend::create_backend,
    client::{Accumulator, ClientState, SseConnection},
    config::{Config, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    server::{self, AppState},
    shutdown::ShutdownCoordinator,
};

/// Relay a streaming chat completion over SSE.
#[derive(Parser, Debug)]
#[command(name = "idea-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve {
        /// Path to configuration file (TOML).
        #[arg(value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Override listen address.
        #[arg(short, long)]
        listen: Option<String>,

        /// Override backend provider (mock, openai).
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// Stream from a relay and render the text as it grows.
    Watch {
        /// Event-stream URL of the relay.
        #[arg(short, long, default_value = "http://127.0.0.1:3000/api/ideas")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Serve {
            config,
            listen,
            backend,
        } => {
            let mut config = Config::load(config.as_ref())?;
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            if let Some(backend) = backend {
                config.backend.provider = backend;
            }
            if args.debug {
                config.logging.level = "debug".to_string();
            }
            init_logging(&config.logging)?;
            serve(config).await
        }
        Command::Watch { url } => {
            let mut logging = LoggingConfig {
                level: "warn".to_string(),
                ..LoggingConfig::default()
            };
            if args.debug {
                logging.level = "debug".to_string();
            }
            init_logging(&logging)?;
            watch(&url).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        stream_path = %config.server.stream_path,
        backend = %config.backend.provider,
        end_event = config.stream.end_event,
        "Starting relay"
    );

    init_metrics();
    if config.metrics.enabled {
        start_metrics_server(config.metrics.listen_addr.parse()?)?;
    }

    let backend = create_backend(&config.backend)?;
    tracing::info!(backend = backend.name(), "Backend initialized");

    let shutdown = ShutdownCoordinator::new();
    let state = Arc::new(AppState::new(&config, backend, shutdown.clone()));
    let listener = server::bind(&config.server).await?;

    tokio::spawn(handle_signals(shutdown.clone()));

    let server_task = tokio::spawn(server::serve(
        listener,
        server::router(state),
        shutdown.clone(),
    ));

    shutdown.signalled().await;
    tracing::info!(
        active = shutdown.active_sessions(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for sessions to drain"
    );

    let drained = tokio::time::timeout(config.server.shutdown_timeout(), async {
        shutdown.wait_for_drain().await;
        server_task.await
    })
    .await;

    match drained {
        Ok(Ok(result)) => {
            result?;
            tracing::info!("All sessions drained");
        }
        Ok(Err(join_err)) => return Err(join_err.into()),
        Err(_) => {
            tracing::warn!(
                active = shutdown.active_sessions(),
                "Shutdown timeout reached, forcing exit"
            );
        }
    }

    tracing::info!("Relay stopped");
    Ok(())
}

async fn watch(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let connection = SseConnection::open(&client, url)?;

    // Print only what each render adds; markdown is left as-is.
    let mut printed = 0usize;
    let render = move |text: &str| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text[printed..].as_bytes());
        let _ = stdout.flush();
        printed = text.len();
    };

    let mut accumulator = Accumulator::new(connection, render, "Loading ideas...");
    eprintln!("{}", accumulator.text());

    let interrupted = tokio::select! {
        _ = accumulator.run() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    println!();
    if interrupted {
        tracing::info!("Interrupted, unmounting");
    }

    let state = accumulator.state();
    let received = accumulator.events_received();
    accumulator.unmount();

    match state {
        ClientState::Errored => anyhow::bail!("event stream failed after {} events", received),
        _ => Ok(()),
    }
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Handle Unix signals.
async fn handle_signals(shutdown: ShutdownCoordinator) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to register signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
    shutdown.shutdown();
}
