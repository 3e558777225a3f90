//! Pushline consumer daemon
//!
//! Subscribes to one or more queues and logs every pushed message,
//! acknowledging each one after it has been logged.
//!
//! ## Usage
//!
//! ```bash
//! # Subscribe to a queue using defaults
//! pushline --queue orders
//!
//! # Load endpoints, credentials and queues from a config file
//! pushline --config /path/to/config.toml
//!
//! # Override endpoints
//! pushline --ws-url wss://queue.example.com/ws --http-url https://queue.example.com --queue orders
//! ```

use clap::Parser;
use pushline::{AckSink, Config, Consumer, PushMessage};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Grace period for ack routers to close their connections on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "pushline")]
#[command(about = "Consume push-delivered queue messages")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket endpoint for the push stream
    #[arg(long, env = "PUSHLINE_WS_URL")]
    ws_url: Option<String>,

    /// HTTP endpoint for acknowledgments
    #[arg(long, env = "PUSHLINE_HTTP_URL")]
    http_url: Option<String>,

    #[arg(long, env = "PUSHLINE_ORGANIZATION_ID")]
    organization_id: Option<u64>,

    #[arg(long, env = "PUSHLINE_CONSUMER_ID")]
    consumer_id: Option<String>,

    #[arg(long, env = "PUSHLINE_CONSUMER_TOKEN")]
    consumer_token: Option<String>,

    /// Authorization header value for both endpoints
    #[arg(long, env = "PUSHLINE_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Queue to subscribe to (repeatable, added to the config file's list)
    #[arg(short, long = "queue")]
    queues: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pushline=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(url) = args.ws_url {
        config.consumer.ws_url = url;
    }
    if let Some(url) = args.http_url {
        config.consumer.http_url = url;
    }
    if let Some(id) = args.organization_id {
        config.consumer.organization_id = id;
    }
    if let Some(id) = args.consumer_id {
        config.consumer.consumer_id = id;
    }
    if let Some(token) = args.consumer_token {
        config.consumer.consumer_token = token;
    }
    if let Some(token) = args.auth_token {
        config.consumer.auth_token = token;
    }
    for queue in args.queues {
        if !config.queues.contains(&queue) {
            config.queues.push(queue);
        }
    }

    if config.queues.is_empty() {
        anyhow::bail!("no queues to subscribe to; pass --queue or list them in the config file");
    }

    info!(
        ws_url = %config.consumer.ws_url,
        http_url = %config.consumer.http_url,
        queues = config.queues.len(),
        "Starting pushline"
    );

    let consumer = Consumer::new(config.consumer)?;

    let mut subscribed = 0;
    for queue_id in &config.queues {
        let queue = queue_id.clone();
        let handler = move |ack: &AckSink, message: PushMessage| {
            info!(
                queue_id = %queue,
                message_id = %message.message_id,
                body = %message.body,
                "Message"
            );
            ack.submit(message.message_id);
        };

        match consumer.subscribe(queue_id, handler).await {
            Ok(()) => subscribed += 1,
            Err(e) => error!(queue_id = %queue_id, error = %e, "Subscribe failed"),
        }
    }

    if subscribed == 0 {
        anyhow::bail!("no subscription could be established");
    }

    tokio::signal::ctrl_c().await.ok();
    warn!("Shutdown requested");

    let stopped = consumer.unsubscribe_all().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!(stopped = stopped, "Shutdown complete");

    Ok(())
}
