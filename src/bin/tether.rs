//! Tether CLI - send numbered messages over a reconnecting WebSocket

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tether::{Connection, ExactMatch, Message, TetherConfig, WsDialer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Send numbered messages over a reconnecting WebSocket and print the replies")]
#[command(version)]
struct Cli {
    /// WebSocket URL (ws:// or wss://)
    #[arg(env = "TETHER_URL")]
    url: String,

    /// Sub-protocol to request during the handshake
    #[arg(long, env = "TETHER_SUBPROTOCOL")]
    subprotocol: Option<String>,

    /// Origin header sent with the handshake
    #[arg(long, env = "TETHER_ORIGIN")]
    origin: Option<String>,

    /// Seconds of silence before a heartbeat is sent (0 disables heartbeats)
    #[arg(long, env = "TETHER_PING_INTERVAL", default_value_t = 5)]
    ping_interval: u64,

    /// Heartbeat payload
    #[arg(long, env = "TETHER_PING_PAYLOAD", default_value = "PING")]
    ping_payload: String,

    /// Do not reconnect after a transport failure
    #[arg(long, env = "TETHER_NO_RECONNECT")]
    no_reconnect: bool,

    /// Number of messages to send
    #[arg(short, long, default_value_t = 10)]
    count: u32,

    /// Milliseconds to wait between messages
    #[arg(long, default_value_t = 2000)]
    pause_ms: u64,

    /// Message prefix; each message is "<prefix> <n>"
    #[arg(long, default_value = "Hello")]
    prefix: String,
}

impl Cli {
    fn config(&self) -> TetherConfig {
        let mut config = TetherConfig::new();
        if !self.no_reconnect {
            config = config.reconnect();
        }
        if self.ping_interval > 0 {
            config = config.heartbeat(
                self.ping_payload.clone().into_bytes(),
                Duration::from_secs(self.ping_interval),
            );
        }
        config
    }

    fn dialer(&self) -> WsDialer {
        match &self.origin {
            Some(origin) => WsDialer::new().header("Origin", origin.as_str()),
            None => WsDialer::new(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let conn = Connection::builder(cli.config())
        .dialer(cli.dialer())
        .matcher(ExactMatch)
        .on_connected(|conn| info!(endpoint = ?conn.target(), "Connected"))
        .on_message(|payload, _| info!("Received: {}", String::from_utf8_lossy(&payload)))
        .on_error(|err| error!("Connection error: {}", err))
        .build();

    conn.connect(&cli.url, cli.subprotocol.as_deref())
        .await
        .with_context(|| format!("Failed to connect to {}", cli.url))?;

    for i in 1..=cli.count {
        let body = format!("{} {}", cli.prefix, i);
        info!("Sending: {}", body);

        let message = Message::new(body).on_reply(|reply, _| {
            info!("Got back: {}", String::from_utf8_lossy(&reply));
        });
        if let Err(e) = conn.send(message).await {
            warn!("Unable to send: {}", e);
        }

        tokio::time::sleep(Duration::from_millis(cli.pause_ms)).await;
    }

    if conn.pending_len() > 0 {
        warn!(pending = conn.pending_len(), "Closing with unanswered messages");
    }
    conn.close().await;
    Ok(())
}
