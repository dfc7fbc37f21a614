//! Async driver for a [`SessionCore`]: owns the one WebSocket, the keyed
//! timers and the history fetches, and feeds every outcome back into the
//! reducer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::time::{delay_queue, DelayQueue};

use crate::agent::{AgentId, MessageKind};
use crate::api::{ApiError, HistorySource};
use crate::core::effect::{Effect, TimerKey};
use crate::core::events::SessionEvent;
use crate::core::SessionCore;
use crate::protocol::FrameCodec;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Where and how to open the socket
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `ws://` or `wss://` URL; the token is appended as `?token=`
    pub url: String,
    pub connect_timeout: Duration,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn url_with_token(&self, token: &str) -> Result<String, String> {
        reqwest::Url::parse_with_params(&self.url, &[("token", token)])
            .map(|url| url.to_string())
            .map_err(|e| format!("invalid server url {}: {}", self.url, e))
    }
}

type ConnectOutcome = (u64, Result<WsStream, String>);
type HistoryOutcome = (AgentId, Result<Vec<MessageKind>, ApiError>);

pub struct ConnectionManager {
    core: Arc<Mutex<SessionCore>>,
    events: broadcast::Sender<SessionEvent>,
    effects_rx: mpsc::UnboundedReceiver<Effect>,
    endpoint: Endpoint,
    history: Arc<dyn HistorySource>,
    codec: FrameCodec,

    writer: Option<WsSink>,
    reader: Option<WsSource>,
    /// Bumped on every open/close so late connect results are discarded
    generation: u64,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    history_tx: mpsc::UnboundedSender<HistoryOutcome>,
    history_rx: mpsc::UnboundedReceiver<HistoryOutcome>,

    timers: DelayQueue<TimerKey>,
    timer_keys: HashMap<TimerKey, delay_queue::Key>,
}

impl ConnectionManager {
    pub fn new(
        core: Arc<Mutex<SessionCore>>,
        events: broadcast::Sender<SessionEvent>,
        effects_rx: mpsc::UnboundedReceiver<Effect>,
        endpoint: Endpoint,
        history: Arc<dyn HistorySource>,
        codec: FrameCodec,
    ) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        Self {
            core,
            events,
            effects_rx,
            endpoint,
            history,
            codec,
            writer: None,
            reader: None,
            generation: 0,
            connect_tx,
            connect_rx,
            history_tx,
            history_rx,
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
        }
    }

    /// Drive the session until every handle has been dropped
    pub async fn run(mut self) {
        tracing::debug!(url = %self.endpoint.url, "Connection manager started");
        loop {
            tokio::select! {
                effect = self.effects_rx.recv() => match effect {
                    Some(effect) => self.perform(effect).await,
                    None => break,
                },
                Some((generation, result)) = self.connect_rx.recv() => {
                    self.on_connect_result(generation, result).await;
                }
                message = next_message(&mut self.reader) => {
                    self.on_message(message).await;
                }
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let key = expired.into_inner();
                    self.timer_keys.remove(&key);
                    self.apply(|core| core.on_timer(key)).await;
                }
                Some((agent_id, result)) = self.history_rx.recv() => {
                    self.apply(|core| core.on_history_loaded(&agent_id, result)).await;
                }
            }
        }

        self.close_socket().await;
        tracing::debug!("Connection manager stopped");
    }

    /// Run a reducer step, then perform what it asked for
    async fn apply(&mut self, step: impl FnOnce(&mut SessionCore)) {
        let effects = {
            let mut core = self.core.lock();
            step(&mut core);
            core.take_effects()
        };
        for effect in effects {
            self.perform(effect).await;
        }
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenSocket { token } => self.open_socket(token).await,
            Effect::CloseSocket => self.close_socket().await,
            Effect::Send(frame) => {
                let Some(writer) = self.writer.as_mut() else {
                    tracing::debug!(frame = frame.type_name(), "No socket, frame dropped");
                    return;
                };
                match self.codec.encode(&frame) {
                    Ok(text) => {
                        tracing::debug!(frame = frame.type_name(), bytes = text.len(), "Sending frame");
                        if let Err(e) = writer.send(Message::Text(text.into())).await {
                            tracing::warn!(error = %e, frame = frame.type_name(), "Socket write failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, frame = frame.type_name(), "Frame not sent")
                    }
                }
            }
            Effect::ScheduleTimer { key, after } => {
                self.cancel_timer(&key);
                let handle = self.timers.insert(key.clone(), after);
                self.timer_keys.insert(key, handle);
            }
            Effect::CancelTimer(key) => self.cancel_timer(&key),
            Effect::FetchHistory { agent_id, cwd } => {
                let history = self.history.clone();
                let tx = self.history_tx.clone();
                tokio::spawn(async move {
                    let result = history.fetch(&cwd, &agent_id).await;
                    let _ = tx.send((agent_id, result));
                });
            }
            Effect::Emit(event) => {
                // No subscribers is fine
                let _ = self.events.send(event);
            }
        }
    }

    fn cancel_timer(&mut self, key: &TimerKey) {
        if let Some(handle) = self.timer_keys.remove(key) {
            self.timers.remove(&handle);
        }
    }

    async fn open_socket(&mut self, token: String) {
        self.close_socket().await;

        let generation = self.generation;
        let url = self.endpoint.url_with_token(&token);
        let timeout = self.endpoint.connect_timeout;
        let tx = self.connect_tx.clone();

        tokio::spawn(async move {
            let result = match url {
                Ok(url) => match time::timeout(timeout, tokio_tungstenite::connect_async(url)).await
                {
                    Ok(Ok((stream, _response))) => Ok(stream),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("connect timed out after {}s", timeout.as_secs())),
                },
                Err(e) => Err(e),
            };
            let _ = tx.send((generation, result));
        });
    }

    async fn close_socket(&mut self) {
        self.generation += 1;
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "Error closing socket");
            }
        }
    }

    async fn on_connect_result(&mut self, generation: u64, result: Result<WsStream, String>) {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "Discarding stale connect");
            return;
        }

        match result {
            Ok(stream) => {
                tracing::info!(url = %self.endpoint.url, "WebSocket connected");
                let (writer, reader) = stream.split();
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.apply(|core| core.on_socket_open()).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket connection failed");
                self.apply(|core| core.on_socket_close(None)).await;
            }
        }
    }

    async fn on_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match message {
            Some(Ok(Message::Text(text))) => {
                let text: &str = &text;
                self.apply(|core| core.on_text(text)).await;
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                let reason = frame
                    .as_ref()
                    .map(|f| {
                        let reason: &str = &f.reason;
                        reason.to_string()
                    })
                    .unwrap_or_default();
                tracing::info!(?code, %reason, "WebSocket closed by server");
                self.close_socket().await;
                self.apply(|core| core.on_socket_close(code)).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket read failed");
                self.close_socket().await;
                self.apply(|core| core.on_socket_close(None)).await;
            }
            None => {
                tracing::warn!("WebSocket stream ended without a close frame");
                self.close_socket().await;
                self.apply(|core| core.on_socket_close(None)).await;
            }
        }
    }
}

async fn next_message(
    reader: &mut Option<WsSource>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}
