//! # ssed
//!
//! Broadcasts lines from standard input to every connected Server-Sent
//! Events client.
//!
//! ## Usage
//!
//! ```bash
//! # Pipe a log into every browser tab on port 3000
//! tail -f app.log | ssed
//!
//! # Interactive prompt on a custom address
//! ssed --prompt --listen 0.0.0.0:8080
//!
//! # Run with custom config
//! ssed --config /path/to/ssed.toml
//!
//! # Run with environment variables
//! SSED_PORT=8080 SSED_HOST=0.0.0.0 ssed
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use config::{Config, ProducerMode};
use ssed_core::{Broker, Producer, PromptProducer, StreamProducer};
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "ssed", version, about = "Server-Sent Events broadcast daemon")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, value_name = "HOST:PORT")]
    listen: Option<String>,

    /// Read messages from an interactive prompt
    #[arg(short, long)]
    prompt: bool,

    /// Log per-message diagnostics
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout belongs to the prompt.
    let default_filter = if cli.verbose { "ssed=debug" } else { "ssed=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        config.set_listen(listen)?;
    }
    if cli.prompt {
        config.producer.mode = ProducerMode::Prompt;
    }
    debug!("Configuration: {:?}", config);

    info!("Starting ssed on {}", config.listen_addr());

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    let broker = Broker::spawn(config.broker_config());
    let shutdown = CancellationToken::new();

    let producer: Box<dyn Producer> = match config.producer.mode {
        ProducerMode::Stream => Box::new(StreamProducer::new(BufReader::new(tokio::io::stdin()))),
        ProducerMode::Prompt => Box::new(PromptProducer::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )),
    };
    tokio::spawn(run_producer(producer, broker.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    handlers::run_server(config, broker, shutdown).await
}

/// Run a producer to completion. Its failure never stops the server.
async fn run_producer(mut producer: Box<dyn Producer>, broker: Broker) {
    let name = producer.name();
    match producer.run(&broker).await {
        Ok(()) => info!(producer = name, "Producer finished"),
        Err(e) => error!(producer = name, error = %e, "Producer failed"),
    }
}
