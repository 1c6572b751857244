//! Transport seam and the WebSocket dialer
//!
//! A [`Dialer`] opens one duplex stream and hands back its two halves: a
//! [`FrameSink`] the connection writes payloads into and a [`FrameStream`] the
//! read loop drains. [`WsDialer`] is the `tokio-tungstenite` implementation.

use crate::error::{Result, TetherError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::debug;

/// Write half of a live transport
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = TetherError> + Send>>;

/// Read half of a live transport. The stream ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Remote endpoint of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Endpoint URL (e.g. "ws://localhost:8080/socket")
    pub url: String,

    /// Sub-protocol requested during the handshake
    pub subprotocol: Option<String>,
}

impl Target {
    /// Create a target, optionally requesting a sub-protocol
    pub fn new(url: impl Into<String>, subprotocol: Option<&str>) -> Self {
        Self {
            url: url.into(),
            subprotocol: subprotocol.map(str::to_string),
        }
    }
}

/// Opens duplex streams to a [`Target`]
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, target: &Target) -> Result<(FrameSink, FrameStream)>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    async fn dial(&self, target: &Target) -> Result<(FrameSink, FrameStream)> {
        (**self).dial(target).await
    }
}

/// WebSocket dialer built on `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsDialer {
    headers: Vec<(String, String)>,
    binary_frames: bool,
}

impl WsDialer {
    /// Create a dialer without extra headers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to every handshake request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Always send binary frames, even for UTF-8 payloads
    pub fn binary_frames(mut self) -> Self {
        self.binary_frames = true;
        self
    }

    fn request(&self, target: &Target) -> Result<Request> {
        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TetherError::Connect(e.to_string()))?;

        let headers = request.headers_mut();
        if let Some(protocol) = &target.subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| TetherError::Connect(format!("invalid sub-protocol: {e}")))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        for (name, value) in &self.headers {
            let name: HeaderName = name
                .parse()
                .map_err(|e| TetherError::Connect(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TetherError::Connect(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, target: &Target) -> Result<(FrameSink, FrameStream)> {
        let request = self.request(target)?;

        debug!(url = %target.url, "Dialing");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| TetherError::Connect(e.to_string()))?;

        let (sink, stream) = ws.split();
        let binary = self.binary_frames;

        let sink = sink
            .sink_map_err(|e| TetherError::Transport(e.to_string()))
            .with(move |payload: Bytes| future::ready(Ok::<_, TetherError>(encode(payload, binary))));

        let stream = stream.filter_map(|frame| future::ready(decode(frame)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Text frame for UTF-8 payloads unless binary is forced.
fn encode(payload: Bytes, binary: bool) -> Frame {
    if binary {
        return Frame::binary(payload);
    }
    match std::str::from_utf8(&payload) {
        Ok(text) => Frame::text(text.to_owned()),
        Err(_) => Frame::binary(payload),
    }
}

/// Data frames become payloads; control frames are handled by tungstenite.
fn decode(
    frame: std::result::Result<Frame, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Bytes>> {
    match frame {
        Ok(Frame::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
        Ok(Frame::Binary(data)) => Some(Ok(data)),
        Ok(Frame::Close(frame)) => {
            debug!(?frame, "Close frame received");
            None
        }
        Ok(_) => None,
        Err(e) => Some(Err(TetherError::Transport(e.to_string()))),
    }
}
