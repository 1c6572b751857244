//! In-memory transport for connection tests

use crate::error::{Result, TetherError};
use crate::transport::{Dialer, FrameSink, FrameStream, Target};

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as chan;
use futures::{stream, FutureExt, Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// The far end of one dialed transport
pub(crate) struct MockRemote {
    pub target: Target,
    /// What the connection wrote; dropping it makes writes fail
    pub outbound: chan::UnboundedReceiver<Bytes>,
    /// What the connection reads; dropping it ends the read stream
    pub inbound: chan::UnboundedSender<Result<Bytes>>,
}

impl MockRemote {
    pub fn reply(&self, payload: &'static [u8]) {
        self.inbound
            .unbounded_send(Ok(Bytes::from_static(payload)))
            .expect("connection stopped reading");
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .unbounded_send(Err(TetherError::Transport(reason.to_string())));
    }

    /// Next written payload, `None` once the connection closed its sink
    pub async fn next_outbound(&mut self) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.next())
            .await
            .ok()
            .flatten()
    }

    /// Everything written so far, without waiting
    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        let mut written = Vec::new();
        while let Some(Some(payload)) = self.outbound.next().now_or_never() {
            written.push(payload);
        }
        written
    }
}

/// Dialer handing every successful dial's far end to the test
pub(crate) struct MockDialer {
    remotes: mpsc::UnboundedSender<MockRemote>,
    refuse: AtomicBool,
    dials: AtomicUsize,
}

impl MockDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            remotes: tx,
            refuse: AtomicBool::new(false),
            dials: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, target: &Target) -> Result<(FrameSink, FrameStream)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TetherError::Connect("connection refused".to_string()));
        }

        let (out_tx, out_rx) = chan::unbounded::<Bytes>();
        let (in_tx, in_rx) = chan::unbounded::<Result<Bytes>>();

        let _ = self.remotes.send(MockRemote {
            target: target.clone(),
            outbound: out_rx,
            inbound: in_tx,
        });

        let sink = out_tx.sink_map_err(|e| TetherError::Transport(e.to_string()));
        Ok((Box::pin(sink), Box::pin(in_rx)))
    }
}

/// Write half whose writes and close never complete
struct StalledSink;

impl Sink<Bytes> for StalledSink {
    type Error = TetherError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Bytes) -> Result<()> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Pending
    }
}

/// Dialer for a peer that accepts the handshake and then stops reading
pub(crate) struct StalledDialer;

#[async_trait]
impl Dialer for StalledDialer {
    async fn dial(&self, _target: &Target) -> Result<(FrameSink, FrameStream)> {
        Ok((Box::pin(StalledSink), Box::pin(stream::pending::<Result<Bytes>>())))
    }
}

/// Poll `condition` for up to two seconds
pub(crate) async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
