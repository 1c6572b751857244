//! Configuration for tether connections

use bytes::Bytes;
use std::time::Duration;

/// Lifecycle configuration for a [`Connection`](crate::Connection)
#[derive(Debug, Clone)]
pub struct TetherConfig {
    /// Whether to redial automatically after a transport failure
    pub reconnect: bool,

    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,

    /// Payload re-sent when the connection has been quiet for `heartbeat_interval`
    pub heartbeat_payload: Option<Bytes>,

    /// Quiet period after which the heartbeat payload is sent
    pub heartbeat_interval: Option<Duration>,

    /// How often the heartbeat scheduler checks its deadline
    pub heartbeat_tick: Duration,

    /// Default expiry for queued reply callbacks (`None` keeps them forever)
    pub pending_ttl: Option<Duration>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            reconnect: false,
            reconnect_delay: Duration::from_secs(1),
            heartbeat_payload: None,
            heartbeat_interval: None,
            heartbeat_tick: Duration::from_millis(100),
            pending_ttl: None,
        }
    }
}

impl TetherConfig {
    /// Create a configuration with reconnect and heartbeat disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable automatic reconnection
    pub fn reconnect(mut self) -> Self {
        self.reconnect = true;
        self
    }

    /// Set the delay between reconnect attempts
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Send `payload` whenever nothing was written for `interval`
    pub fn heartbeat(mut self, payload: impl Into<Bytes>, interval: Duration) -> Self {
        self.heartbeat_payload = Some(payload.into());
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Set the heartbeat polling tick
    pub fn heartbeat_tick(mut self, tick: Duration) -> Self {
        self.heartbeat_tick = tick;
        self
    }

    /// Expire queued reply callbacks after `ttl`
    pub fn pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = Some(ttl);
        self
    }

    /// The heartbeat payload and interval, if both are usable.
    pub(crate) fn heartbeat_settings(&self) -> Option<(Bytes, Duration)> {
        match (&self.heartbeat_payload, self.heartbeat_interval) {
            (Some(payload), Some(interval)) if !payload.is_empty() && !interval.is_zero() => {
                Some((payload.clone(), interval))
            }
            _ => None,
        }
    }
}
