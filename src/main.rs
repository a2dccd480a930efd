#![allow(missing_docs)]

//! mmbridge: Mattermost adapter for a multi-platform chat relay.
//!
//! `mmbridge plan` prints the connection strategy the configuration resolves
//! to. `mmbridge run` connects and speaks JSON lines with the gateway:
//! canonical messages from Mattermost go to stdout, canonical messages read
//! from stdin are sent to Mattermost.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mmbridge::bridge::{Bridge, ConnectionPlan};
use mmbridge::config::BridgeConfig;
use mmbridge::logging;
use mmbridge::types::CanonicalMessage;

/// Mattermost adapter for a chat relay gateway.
#[derive(Parser, Debug)]
#[command(name = "mmbridge", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "MMBRIDGE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the connection strategy the configuration resolves to
    Plan,

    /// Connect and relay JSON-line canonical messages over stdin/stdout
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config =
        BridgeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Plan => print_plan(&config),
        Commands::Run => run(config).await,
    }
}

fn print_plan(config: &BridgeConfig) -> Result<()> {
    let plan = ConnectionPlan::resolve(&config.mattermost)?;
    println!("{plan}");
    Ok(())
}

async fn run(config: BridgeConfig) -> Result<()> {
    let _guard = match config.runtime.logs_dir.as_deref() {
        Some(dir) => Some(logging::init_production(
            Path::new(dir),
            &config.runtime.log_level,
        )?),
        None => {
            logging::init_cli(&config.runtime.log_level);
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "mmbridge starting");

    let (gateway_tx, mut gateway_rx) =
        mpsc::channel::<CanonicalMessage>(config.runtime.channel_buffer_size.max(1));
    let bridge = Bridge::connect(&config, gateway_tx)
        .await
        .context("failed to connect to Mattermost")?;

    for channel in &config.mattermost.channels {
        match bridge.join_channel(channel).await {
            Ok(()) => debug!(channel = %channel, "channel join handled"),
            Err(e) => warn!(error = %e, channel = %channel, "failed to join channel"),
        }
    }

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = gateway_rx.recv().await {
            let line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode canonical message");
                    continue;
                }
            };
            if let Err(e) = write_line(&mut stdout, &line).await {
                error!(error = %e, "stdout closed, stopping gateway writer");
                break;
            }
        }
    });

    info!(plan = %bridge.plan(), "mmbridge ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(&bridge, &line).await,
                    Ok(None) => {
                        info!("gateway input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read gateway input");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("received Ctrl-C, shutting down");
                break;
            }
        }
    }

    bridge.disconnect();
    writer.abort();
    Ok(())
}

async fn handle_line(bridge: &Bridge, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let message: CanonicalMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "ignoring malformed gateway line");
            return;
        }
    };
    // Failures are logged by the translator.
    if let Ok(remote_id) = bridge.send(message).await {
        debug!(remote_id = %remote_id, "message delivered");
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
