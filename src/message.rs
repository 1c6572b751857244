//! Outbound messages and reply callbacks

use crate::connection::Connection;

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Invoked once with the reply payload and the connection it arrived on
pub type ReplyCallback = Box<dyn FnOnce(Bytes, Connection) + Send + 'static>;

/// One outbound payload, optionally waiting for a correlated reply
pub struct Message {
    pub(crate) body: Bytes,
    pub(crate) callback: Option<ReplyCallback>,
    pub(crate) ttl: Option<Duration>,
}

impl Message {
    /// A fire-and-forget message
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            callback: None,
            ttl: None,
        }
    }

    /// Call `callback` with the first inbound payload the matcher pairs with this message
    pub fn on_reply<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Bytes, Connection) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Forget the reply callback if no reply arrived within `ttl`.
    ///
    /// Overrides [`TetherConfig::pending_ttl`](crate::TetherConfig::pending_ttl).
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The payload to be written
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether a reply callback is attached
    pub fn expects_reply(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("body", &self.body)
            .field("expects_reply", &self.expects_reply())
            .field("ttl", &self.ttl)
            .finish()
    }
}
