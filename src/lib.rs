//! Tether
//!
//! A reconnecting, event-driven WebSocket client. Reads and writes are hidden
//! behind hooks, a sent message can wait for its correlated reply, and the
//! connection is kept alive with heartbeats and automatic reconnects.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tether::{Connection, ExactMatch, Message, TetherConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TetherConfig::new()
//!         .reconnect()
//!         .heartbeat("PING", Duration::from_secs(5));
//!
//!     let conn = Connection::builder(config)
//!         .on_connected(|_| println!("Connected"))
//!         .on_message(|payload, _| println!("Received: {:?}", payload))
//!         .on_error(|err| eprintln!("Error: {}", err))
//!         .matcher(ExactMatch)
//!         .build();
//!
//!     conn.connect("ws://localhost:8080", None).await?;
//!
//!     // The echo server's reply is handed to this message's own callback
//!     conn.send(Message::new("Hello").on_reply(|reply, _| {
//!         println!("Got back: {:?}", reply);
//!     }))
//!     .await?;
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod heartbeat;
mod matcher;
mod message;
mod queue;
mod transport;

#[cfg(test)]
mod testing;

pub use config::TetherConfig;
pub use connection::{
    ConnectedHook, Connection, ConnectionBuilder, ConnectionState, ErrorHook, MessageHook,
    PendingReply,
};
pub use error::{Result, TetherError};
pub use matcher::{ExactMatch, KeyMatch, Matcher};
pub use message::{Message, ReplyCallback};
pub use transport::{Dialer, FrameSink, FrameStream, Target, WsDialer};

// Re-export so custom dialers and callers share one `Bytes`
pub use bytes::Bytes;
