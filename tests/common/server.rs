//! A loopback WebSocket server scripted from the test body.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use switchboard::Endpoint;

use super::WAIT;

pub struct ScriptedServer {
    url: String,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("No local address");
        let (tx, conns) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(conn) = ServerConn::upgrade(stream).await {
                        let _ = tx.send(conn);
                    }
                });
            }
        });

        Self {
            url: format!("ws://{}/ws", addr),
            conns,
            task,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.url.clone()).with_connect_timeout(Duration::from_secs(2))
    }

    /// Next client connection
    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener stopped")
    }

    pub async fn assert_no_connection(&mut self, within: Duration) {
        assert!(
            timeout(within, self.conns.recv()).await.is_err(),
            "client reconnected unexpectedly"
        );
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server end of one accepted socket
pub struct ServerConn {
    /// Request URI of the upgrade, including the query string
    pub uri: String,
    frames: mpsc::UnboundedReceiver<Value>,
    out: mpsc::UnboundedSender<Message>,
}

impl ServerConn {
    async fn upgrade(stream: TcpStream) -> Option<Self> {
        let mut uri = String::new();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .ok()?;

        let (mut sink, mut source) = ws.split();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (out, mut out_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(Ok(message)) = source.next().await {
                match message {
                    Message::Text(text) => {
                        let text: &str = &text;
                        if let Ok(value) = serde_json::from_str::<Value>(text) {
                            let _ = frames_tx.send(value);
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        Some(Self { uri, frames, out })
    }

    pub fn send(&self, frame: Value) {
        let _ = self.out.send(Message::Text(frame.to_string().into()));
    }

    /// Close the socket with an application close code
    pub fn close(&self, code: u16) {
        let _ = self.out.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: String::from("closed by test").into(),
        })));
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client hung up")
    }

    /// Next frame of the given type, skipping any others
    pub async fn recv_type(&mut self, frame_type: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] == frame_type {
                return frame;
            }
        }
    }

    /// Every frame the client sends within `window`
    pub async fn frames_within(&mut self, window: Duration) -> Vec<Value> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.frames.recv()).await {
            seen.push(frame);
        }
        seen
    }
}
