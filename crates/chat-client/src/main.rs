//! Bot client entry point
//!
//! Run with:
//! ```bash
//! BOT_TOKEN=... cargo run -p chat-client
//! ```
//!
//! Configuration is loaded from environment variables (and `.env`).

use anyhow::Context;
use chat_client::Client;
use chat_common::{try_init_tracing, try_init_tracing_with_config, ClientConfig, TracingConfig};
use chat_gateway::ShardEvent;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Client stopped with error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            if let Err(e) = try_init_tracing() {
                eprintln!("Warning: Failed to initialize tracing: {e}");
            }
            return Err(e).context("Failed to load configuration");
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        app = %config.app.name,
        env = ?config.app.env,
        shard_count = ?config.gateway.shard_count,
        "Configuration loaded"
    );

    let mut client = Client::builder(config).start().await?;
    let mut events = client
        .take_events()
        .context("Shard events already taken")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                }
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => {
                    info!("All shards stopped");
                    break;
                }
            },
        }
    }

    client.shutdown().await?;
    info!("Client stopped");
    Ok(())
}

fn log_event(event: &ShardEvent) {
    match event {
        ShardEvent::Ready {
            shard_id,
            session_id,
        } => info!(shard_id, session_id = %session_id, "Shard ready"),
        ShardEvent::Resumed { shard_id, replayed } => {
            info!(shard_id, replayed, "Shard resumed");
        }
        ShardEvent::Dispatch {
            shard_id,
            event,
            sequence,
            ..
        } => tracing::debug!(shard_id, event = %event, sequence = ?sequence, "Dispatch"),
        ShardEvent::HeartbeatAck { shard_id, latency } => {
            tracing::trace!(shard_id, latency_ms = latency.as_millis() as u64, "Heartbeat ack");
        }
        ShardEvent::Disconnected { shard_id, code } => {
            warn!(shard_id, code = ?code, "Shard disconnected");
        }
        ShardEvent::Reconnecting { shard_id, resume } => {
            info!(shard_id, resume, "Shard reconnecting");
        }
        ShardEvent::Fatal {
            shard_id,
            category,
            reason,
            ..
        } => error!(shard_id, category = %category, reason = %reason, "Shard failed"),
    }
}
