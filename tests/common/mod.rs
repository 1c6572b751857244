//! Local WebSocket echo server shared by the integration suites

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;

/// Text frame that makes the server close the connection
pub const CLOSE_NOW: &str = "close-now";

/// Echoes every text and binary frame back to the sender
pub struct EchoServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    protocols: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let protocols = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let accepted = accepted.clone();
            let received = received.clone();
            let protocols = protocols.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };

                    let protocols_seen = protocols.clone();
                    let echo_protocol = move |request: &Request, mut response: Response| {
                        if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                            if let Ok(name) = protocol.to_str() {
                                protocols_seen.lock().push(name.to_string());
                            }
                            response
                                .headers_mut()
                                .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
                        }
                        Ok::<_, ErrorResponse>(response)
                    };

                    let Ok(mut ws) = accept_hdr_async(stream, echo_protocol).await else {
                        continue;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);

                    let received = received.clone();
                    tokio::spawn(async move {
                        while let Some(Ok(msg)) = ws.next().await {
                            match msg {
                                Message::Text(ref text) if text.as_str() == CLOSE_NOW => {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                                Message::Text(ref text) => {
                                    received.lock().push(text.as_str().as_bytes().to_vec());
                                    if ws.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Message::Binary(ref data) => {
                                    received.lock().push(data.to_vec());
                                    if ws.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Message::Close(_) => break,
                                _ => {}
                            }
                        }
                    });
                }
            }
        });

        Self {
            port,
            accepted,
            received,
            protocols,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Number of completed handshakes
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every data frame received so far, in order
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }

    /// Sub-protocols requested by clients
    pub fn protocols(&self) -> Vec<String> {
        self.protocols.lock().clone()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing listens on
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{}", port)
}

/// Poll `condition` for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
