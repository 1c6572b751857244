//! Heartbeat scheduler
//!
//! Keeps network activity flowing: when nothing has been written for the
//! configured interval the heartbeat payload is sent through the regular send
//! path, so a failing heartbeat tears the connection down exactly like a
//! failing user send would.

use crate::connection::{closed, Inner};
use crate::message::Message;

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Next-heartbeat deadline, pushed back by every successful write
pub(crate) struct HeartbeatClock {
    interval: Duration,
    deadline: Mutex<Instant>,
}

impl HeartbeatClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Mutex::new(Instant::now() + interval),
        }
    }

    /// Record outbound traffic
    pub fn touch(&self) {
        *self.deadline.lock() = Instant::now() + self.interval;
    }

    pub fn is_due(&self) -> bool {
        Instant::now() >= *self.deadline.lock()
    }
}

/// Poll the deadline until the transport of `generation` is gone.
///
/// Exits for good on the first failed send; the next successful dial starts
/// a fresh scheduler.
pub(crate) async fn run(inner: Arc<Inner>, generation: u64, payload: Bytes) {
    let Some(clock) = inner.heartbeat_clock() else {
        return;
    };

    let mut closing = inner.closing_signal();
    let mut ticker = tokio::time::interval(inner.config().heartbeat_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = closed(&mut closing) => break,
            _ = ticker.tick() => {}
        }

        if inner.generation() != generation {
            break;
        }
        if !clock.is_due() {
            continue;
        }

        match inner.send(Message::new(payload.clone())).await {
            Ok(_) => debug!(generation, "Heartbeat sent"),
            Err(e) => {
                debug!(generation, error = %e, "Heartbeat failed, stopping scheduler");
                break;
            }
        }
    }

    debug!(generation, "Heartbeat scheduler stopped");
}
