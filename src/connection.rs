//! Connection manager for the per-run event stream.
//!
//! At most one stream is open at a time. [`ConnectionManager::connect`] closes
//! any previous stream, opens a new one through a [`StreamTransport`], and
//! spawns a reader task that forwards frames into an [`EventStream`]. Status
//! changes are published on a `watch` channel.
//!
//! Reconnection is never attempted here; callers decide.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::ConnectionError;

/// Frame surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { clean: bool, reason: String },
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

/// Something that can open a frame stream for a URL.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectionError>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectionError> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ConnectionError::Timeout {
                secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| ConnectionError::Open(e.to_string()))?;

        let frames = stream.filter_map(|msg| async move { frame_from_message(msg) });
        Ok(Box::pin(frames))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionStatus {
    pub fn label(&self) -> &str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error(_) => "error",
        }
    }
}

/// Item yielded by an [`EventStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Raw frame text, still to be classified.
    Frame(String),
    /// The server closed the stream cleanly.
    Closed,
    /// The stream ended abnormally.
    Failed(ConnectionError),
}

/// Receiving half of one run's stream.
#[derive(Debug)]
pub struct EventStream {
    run_id: String,
    rx: mpsc::Receiver<StreamItem>,
}

impl EventStream {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `None` once the stream has finished or was disconnected.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

/// Map one WebSocket message to a [`Frame`]. Control frames yield `None`.
fn frame_from_message(
    msg: Result<Message, tungstenite::Error>,
) -> Option<Result<Frame, ConnectionError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        // Invalid UTF-8 still reaches the classifier as a log line.
        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))),
        Ok(Message::Close(frame)) => {
            let (clean, reason) = match frame {
                Some(f) => (
                    matches!(f.code, CloseCode::Normal | CloseCode::Away),
                    format!("{} {}", u16::from(f.code), f.reason),
                ),
                // No status code: treat as a normal close.
                None => (true, String::new()),
            };
            Some(Ok(Frame::Close {
                clean,
                reason: reason.trim().to_string(),
            }))
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(ConnectionError::Dropped(e.to_string()))),
    }
}

struct ActiveStream {
    run_id: String,
    task: JoinHandle<()>,
}

/// Status sender bound to one connection. Publishes are ignored once a
/// newer connect or a disconnect has superseded it.
struct StatusPublisher {
    tx: watch::Sender<ConnectionStatus>,
    generation: Arc<AtomicU64>,
    mine: u64,
}

impl StatusPublisher {
    fn publish(&self, status: ConnectionStatus) -> bool {
        if self.generation.load(Ordering::SeqCst) != self.mine {
            debug!(?status, "Stale connection status ignored");
            return false;
        }
        self.tx.send_replace(status);
        true
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn StreamTransport>,
    base: Url,
    status_tx: watch::Sender<ConnectionStatus>,
    generation: Arc<AtomicU64>,
    active: Option<ActiveStream>,
}

impl ConnectionManager {
    /// `base` is the stream root, e.g. `ws://127.0.0.1:8000`.
    pub fn new(transport: Arc<dyn StreamTransport>, base: Url) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            transport,
            base,
            status_tx,
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn active_run(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.run_id.as_str())
    }

    pub fn stream_url(&self, run_id: &str) -> Result<Url, ConnectionError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectionError::InvalidUrl {
                url: self.base.to_string(),
                message: "cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(["ws", run_id]);
        Ok(url)
    }

    /// Open the stream for `run_id`, closing any previous one first.
    pub async fn connect(&mut self, run_id: &str) -> Result<EventStream, ConnectionError> {
        self.disconnect();
        let url = self.stream_url(run_id)?;

        self.status_tx.send_replace(ConnectionStatus::Connecting);
        info!(run_id, url = %url, "Opening event stream");

        let mut frames = match self.transport.open(&url).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(run_id, error = %e, "Failed to open event stream");
                self.status_tx
                    .send_replace(ConnectionStatus::Error(e.to_string()));
                return Err(e);
            }
        };
        self.status_tx.send_replace(ConnectionStatus::Connected);

        let (tx, rx) = mpsc::channel(256);
        let publisher = StatusPublisher {
            tx: self.status_tx.clone(),
            generation: Arc::clone(&self.generation),
            mine: self.generation.load(Ordering::SeqCst),
        };
        let task_run_id = run_id.to_string();

        let task = tokio::spawn(async move {
            let terminal = loop {
                match frames.next().await {
                    Some(Ok(Frame::Text(text))) => {
                        if tx.send(StreamItem::Frame(text)).await.is_err() {
                            debug!(run_id = %task_run_id, "Stream receiver dropped");
                            break None;
                        }
                    }
                    Some(Ok(Frame::Close { clean: true, .. })) => break Some(StreamItem::Closed),
                    Some(Ok(Frame::Close { clean: false, reason })) => {
                        break Some(StreamItem::Failed(ConnectionError::Dropped(format!(
                            "closed abnormally ({})",
                            reason
                        ))));
                    }
                    Some(Err(e)) => break Some(StreamItem::Failed(e)),
                    None => {
                        break Some(StreamItem::Failed(ConnectionError::Dropped(
                            "stream ended without a close frame".to_string(),
                        )));
                    }
                }
            };

            match &terminal {
                Some(StreamItem::Failed(e)) => {
                    warn!(run_id = %task_run_id, error = %e, "Event stream dropped");
                    publisher.publish(ConnectionStatus::Error(e.to_string()));
                }
                _ => {
                    info!(run_id = %task_run_id, "Event stream closed");
                    publisher.publish(ConnectionStatus::Disconnected);
                }
            }
            if let Some(item) = terminal {
                let _ = tx.send(item).await;
            }
        });

        self.active = Some(ActiveStream {
            run_id: run_id.to_string(),
            task,
        });
        Ok(EventStream {
            run_id: run_id.to_string(),
            rx,
        })
    }

    /// Close the active stream, if any. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(active) = self.active.take() {
            debug!(run_id = %active.run_id, "Closing event stream");
            active.task.abort();
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

/// Derive the stream root from an HTTP base URL.
pub fn ws_base_from_http(base: &Url) -> Result<Url, ConnectionError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectionError::InvalidUrl {
                url: base.to_string(),
                message: format!("unsupported scheme '{}'", other),
            });
        }
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| ConnectionError::InvalidUrl {
            url: base.to_string(),
            message: "cannot change scheme".to_string(),
        })?;
    Ok(url)
}
