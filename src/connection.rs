//! Connection state machine
//!
//! A [`Connection`] owns at most one live transport at a time. Around it run
//! a read loop, an optional heartbeat scheduler and, after a failure, an
//! optional reconnect loop, each on its own task. All of them share the same
//! `Inner`:
//!
//! - the live transport and the published state sit behind one async mutex,
//!   which `send` holds across the write, so writes are serialized and a
//!   half-closed transport is never written to. A write still in flight is
//!   abandoned when `close()` is called;
//! - every transport gets a generation number, and teardown only acts on the
//!   generation it was started for, so a failure is reported exactly once
//!   even when both the writer and the reader observe it.

use crate::config::TetherConfig;
use crate::error::{Result, TetherError};
use crate::heartbeat::{self, HeartbeatClock};
use crate::matcher::Matcher;
use crate::message::{Message, ReplyCallback};
use crate::queue::PendingQueue;
use crate::transport::{Dialer, FrameSink, FrameStream, Target, WsDialer};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long closing a transport may take before it is abandoned
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live transport
    Disconnected,
    /// Dialing
    Connecting,
    /// A transport is live
    Connected,
}

/// Invoked after every successful connect or reconnect
pub type ConnectedHook = Arc<dyn Fn(Connection) + Send + Sync>;

/// Invoked with every inbound payload
pub type MessageHook = Arc<dyn Fn(Bytes, Connection) + Send + Sync>;

/// Invoked once per transport failure
pub type ErrorHook = Arc<dyn Fn(&TetherError) + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    on_connected: Option<ConnectedHook>,
    on_message: Option<MessageHook>,
    on_error: Option<ErrorHook>,
}

/// The live transport: write half plus the read loop's stop signal
struct Link {
    generation: u64,
    sink: FrameSink,
    _stop_reader: oneshot::Sender<()>,
}

impl Link {
    /// Close the write half; dropping the link stops its read loop.
    async fn shutdown(mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(generation = self.generation, error = %e, "Transport close failed"),
            Err(_) => debug!(generation = self.generation, "Transport close timed out"),
        }
    }
}

/// Internal connection state
pub(crate) struct Inner {
    config: TetherConfig,
    hooks: Hooks,
    matcher: Option<Arc<dyn Matcher>>,
    dialer: Arc<dyn Dialer>,

    // Last dialed endpoint, reused by reconnect
    target: Mutex<Option<Target>>,

    link: tokio::sync::Mutex<Option<Link>>,
    state: watch::Sender<ConnectionState>,
    closing: watch::Sender<bool>,
    generation: AtomicU64,
    reconnecting: AtomicBool,

    queue: PendingQueue<ReplyCallback>,
    heartbeat: Option<HeartbeatClock>,
}

/// Handle to a reconnecting, event-driven duplex connection
///
/// Cheaply cloneable; every clone drives the same connection. Hooks and
/// callbacks receive a clone as well.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Configures hooks, matcher and transport before a [`Connection`] exists
pub struct ConnectionBuilder {
    config: TetherConfig,
    hooks: Hooks,
    matcher: Option<Arc<dyn Matcher>>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ConnectionBuilder {
    /// Called on its own task after every successful (re)connect
    pub fn on_connected<F>(mut self, hook: F) -> Self
    where
        F: Fn(Connection) + Send + Sync + 'static,
    {
        self.hooks.on_connected = Some(Arc::new(hook));
        self
    }

    /// Called on its own task for every inbound payload, matched or not
    pub fn on_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(Bytes, Connection) + Send + Sync + 'static,
    {
        self.hooks.on_message = Some(Arc::new(hook));
        self
    }

    /// Called once for every read or write failure of a live transport
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TetherError) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Correlate inbound payloads with queued requests.
    ///
    /// Without a matcher reply callbacks are queued but never fire.
    pub fn matcher(mut self, matcher: impl Matcher) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Use a custom transport instead of [`WsDialer`]
    pub fn dialer(mut self, dialer: impl Dialer) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Create the connection, disconnected until `connect` is called
    pub fn build(self) -> Connection {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (closing, _) = watch::channel(false);
        let heartbeat = self
            .config
            .heartbeat_settings()
            .map(|(_, interval)| HeartbeatClock::new(interval));

        let inner = Arc::new(Inner {
            hooks: self.hooks,
            matcher: self.matcher,
            dialer: self.dialer.unwrap_or_else(|| Arc::new(WsDialer::new())),
            target: Mutex::new(None),
            link: tokio::sync::Mutex::new(None),
            state,
            closing,
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            queue: PendingQueue::new(),
            heartbeat,
            config: self.config,
        });

        Connection { inner }
    }
}

impl Connection {
    /// A connection without hooks over WebSocket
    pub fn new(config: TetherConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start configuring hooks, matcher and dialer
    pub fn builder(config: TetherConfig) -> ConnectionBuilder {
        ConnectionBuilder {
            config,
            hooks: Hooks::default(),
            matcher: None,
            dialer: None,
        }
    }

    /// Dial `url`, requesting `subprotocol` if given.
    ///
    /// Fails with [`TetherError::Connect`] if the handshake fails; nothing is
    /// retried and nothing is started in that case. On success the read loop
    /// and heartbeat start and the connected hook fires. Dialing while
    /// connected replaces the live transport. The endpoint is remembered for
    /// reconnects. Reply callbacks still pending from an earlier transport
    /// are dropped once the new one is installed.
    pub async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<()> {
        *self.inner.target.lock() = Some(Target::new(url, subprotocol));
        self.inner.closing.send_replace(false);
        self.inner.establish().await
    }

    /// Write a message.
    ///
    /// Fails with [`TetherError::Closed`] without touching the transport when
    /// not connected. A write failure tears the connection down (reporting it
    /// through the error hook) and is returned as well. If the message carries
    /// a reply callback, the returned [`PendingReply`] can cancel it. A write
    /// that has not finished when [`close`](Self::close) is called fails with
    /// [`TetherError::Closed`].
    pub async fn send(&self, message: Message) -> Result<Option<PendingReply>> {
        let id = self.inner.send(message).await?;
        Ok(id.map(|id| PendingReply {
            id,
            inner: self.inner.clone(),
        }))
    }

    /// Close the transport and stop every background task.
    ///
    /// No hook fires and no reconnect follows. [`connect`](Self::connect)
    /// may be called again afterwards.
    pub async fn close(&self) {
        info!("Closing connection");
        self.inner.closing.send_replace(true);

        let link = {
            let mut link = self.inner.link.lock().await;
            self.inner.state.send_replace(ConnectionState::Disconnected);
            link.take()
        };
        if let Some(link) = link {
            link.shutdown().await;
        }
    }

    /// Check if a transport is live
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The endpoint of the last `connect` call
    pub fn target(&self) -> Option<Target> {
        self.inner.target.lock().clone()
    }

    /// Number of reply callbacks still waiting
    pub fn pending_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Drop expired reply callbacks, returning how many were dropped
    pub fn evict_expired(&self) -> usize {
        self.inner.queue.evict_expired()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("target", &self.target())
            .field("pending", &self.pending_len())
            .finish()
    }
}

/// A queued reply callback
pub struct PendingReply {
    id: Uuid,
    inner: Arc<Inner>,
}

impl PendingReply {
    /// Id of the queued entry
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the callback is still waiting for its reply
    pub fn is_pending(&self) -> bool {
        self.inner.queue.contains(self.id)
    }

    /// Forget the callback. Returns false if it already fired or expired.
    pub fn cancel(self) -> bool {
        self.inner.queue.remove(self.id)
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

impl Inner {
    pub(crate) fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub(crate) fn heartbeat_clock(&self) -> Option<&HeartbeatClock> {
        self.heartbeat.as_ref()
    }

    pub(crate) fn closing_signal(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    fn handle(self: &Arc<Self>) -> Connection {
        Connection {
            inner: self.clone(),
        }
    }

    /// Dial the remembered target and install the new transport
    async fn establish(self: &Arc<Self>) -> Result<()> {
        let target = self
            .target
            .lock()
            .clone()
            .ok_or_else(|| TetherError::Connect("no address to dial".into()))?;

        self.state.send_if_modified(|state| {
            let idle = *state == ConnectionState::Disconnected;
            if idle {
                *state = ConnectionState::Connecting;
            }
            idle
        });

        info!(url = %target.url, subprotocol = ?target.subprotocol, "Connecting");
        let (sink, stream) = match self.dialer.dial(&target).await {
            Ok(halves) => halves,
            Err(e) => {
                self.settle_connecting();
                return Err(match e {
                    TetherError::Connect(_) => e,
                    other => TetherError::Connect(other.to_string()),
                });
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_reader, reader_stopped) = oneshot::channel();
        let link = Link {
            generation,
            sink,
            _stop_reader: stop_reader,
        };

        let installed = {
            let mut live = self.link.lock().await;
            if self.is_closing() {
                Err(link)
            } else {
                // Replies to requests written on an earlier transport never arrive
                let dropped = self.queue.clear();
                if dropped > 0 {
                    debug!(generation, dropped, "Dropped pending replies from previous transport");
                }
                let replaced = live.replace(link);
                self.state.send_replace(ConnectionState::Connected);
                Ok(replaced)
            }
        };

        match installed {
            Ok(Some(replaced)) => {
                debug!(generation = replaced.generation, "Replacing live transport");
                replaced.shutdown().await;
            }
            Ok(None) => {}
            Err(link) => {
                debug!(generation, "Closed while dialing, dropping transport");
                self.settle_connecting();
                link.shutdown().await;
                return Err(TetherError::Closed);
            }
        }

        info!(url = %target.url, generation, "Connected");

        tokio::spawn(read_loop(self.clone(), generation, stream, reader_stopped));

        if let Some((payload, _)) = self.config.heartbeat_settings() {
            if let Some(clock) = &self.heartbeat {
                clock.touch();
            }
            tokio::spawn(heartbeat::run(self.clone(), generation, payload));
        }

        if let Some(hook) = self.hooks.on_connected.clone() {
            let conn = self.handle();
            tokio::spawn(async move { hook(conn) });
        }

        Ok(())
    }

    /// Back to `Disconnected` if a dial left us in `Connecting`
    fn settle_connecting(&self) {
        self.state.send_if_modified(|state| {
            let connecting = *state == ConnectionState::Connecting;
            if connecting {
                *state = ConnectionState::Disconnected;
            }
            connecting
        });
    }

    pub(crate) async fn send(self: &Arc<Self>, message: Message) -> Result<Option<Uuid>> {
        let Message {
            body,
            callback,
            ttl,
        } = message;

        let mut closing = self.closing_signal();
        let (generation, error) = {
            let mut live = self.link.lock().await;
            let Some(link) = live.as_mut() else {
                return Err(TetherError::Closed);
            };

            // Queued before the write so a fast reply cannot overtake it
            let pending = callback.map(|callback| {
                self.queue
                    .push(body.clone(), callback, ttl.or(self.config.pending_ttl))
            });

            let len = body.len();
            let written = tokio::select! {
                result = link.sink.send(body) => result,
                _ = closed(&mut closing) => {
                    // A stalled write must not keep close() off the link
                    if let Some(id) = pending {
                        self.queue.remove(id);
                    }
                    debug!(generation = link.generation, "Write abandoned, closing");
                    return Err(TetherError::Closed);
                }
            };
            match written {
                Ok(()) => {
                    if let Some(clock) = &self.heartbeat {
                        clock.touch();
                    }
                    debug!(bytes = len, pending = ?pending, "Sent");
                    return Ok(pending);
                }
                Err(e) => {
                    if let Some(id) = pending {
                        self.queue.remove(id);
                    }
                    (link.generation, e)
                }
            }
        };

        self.teardown(generation, error.clone()).await;
        Err(error)
    }

    /// Match `payload` against the queue and fire hooks
    fn dispatch(self: &Arc<Self>, payload: Bytes) {
        debug!(bytes = payload.len(), "Received");

        if let Some(matcher) = &self.matcher {
            if let Some(entry) = self.queue.take_match(&payload, matcher.as_ref()) {
                debug!(id = %entry.id, "Reply matched pending request");
                let callback = entry.waiter;
                let reply = payload.clone();
                let conn = self.handle();
                tokio::spawn(async move { callback(reply, conn) });
            }
        }

        if let Some(hook) = self.hooks.on_message.clone() {
            let conn = self.handle();
            tokio::spawn(async move { hook(payload, conn) });
        }
    }

    /// Close the transport of `generation`, report `error` and maybe reconnect.
    ///
    /// Later calls for the same generation are no-ops.
    async fn teardown(self: &Arc<Self>, generation: u64, error: TetherError) {
        let link = {
            let mut live = self.link.lock().await;
            match live.as_ref() {
                Some(link) if link.generation == generation => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    live.take()
                }
                _ => None,
            }
        };

        let Some(link) = link else {
            debug!(generation, error = %error, "Transport already torn down");
            return;
        };
        link.shutdown().await;

        warn!(generation, error = %error, "Connection lost");
        if let Some(hook) = &self.hooks.on_error {
            hook(&error);
        }

        if self.config.reconnect && !self.is_closing() {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect loop already running");
            return;
        }
        tokio::spawn(reconnect_loop(self.clone()));
    }
}

/// Resolves once `close()` has been called
pub(crate) async fn closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closing| *closing).await;
}

async fn read_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut stream: FrameStream,
    mut stopped: oneshot::Receiver<()>,
) {
    let error = loop {
        tokio::select! {
            _ = &mut stopped => {
                debug!(generation, "Read loop stopped");
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(payload)) => inner.dispatch(payload),
                Some(Err(e)) => break e,
                None => break TetherError::Transport("connection closed by peer".into()),
            },
        }
    };

    inner.teardown(generation, error).await;
}

/// Redial with a fixed delay until connected or closed.
///
/// Boxed because it sits on the cycle establish -> read loop -> teardown.
fn reconnect_loop(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    async move {
        let mut closing = inner.closing_signal();
        let delay = inner.config.reconnect_delay;
        let mut attempt: u64 = 0;

        loop {
            loop {
                if inner.is_closing() || inner.is_connected() {
                    break;
                }

                attempt += 1;
                match inner.establish().await {
                    Ok(()) => {
                        info!(attempt, "Reconnected");
                        break;
                    }
                    Err(e) => warn!(attempt, error = %e, "Reconnect failed, retrying in {:?}", delay),
                }

                tokio::select! {
                    _ = closed(&mut closing) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            inner.reconnecting.store(false, Ordering::SeqCst);

            // A teardown racing the flag above may have skipped spawning a loop
            if inner.is_closing()
                || inner.is_connected()
                || inner.reconnecting.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }

        if inner.is_closing() {
            debug!("Reconnect cancelled");
        }
    }
    .boxed()
}
