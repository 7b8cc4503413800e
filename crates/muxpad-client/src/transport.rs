//! Socket transport: one duplex WebSocket carrying text control frames and
//! binary terminal bytes.
//!
//! The link driver never touches tungstenite types directly. A `Connector`
//! dial produces a `Connection`: an outbound `FrameSender` backed by a
//! queue into a pump task, and an inbound frame receiver. The pump task
//! owns the socket halves; when either direction dies it flips the shared
//! open flag and drops its channel ends, which is how the driver observes
//! the close. Senders check the flag immediately before every send, since
//! a send may race a close from the pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;
use url::Url;

use crate::error::LinkError;

/// One frame on the session socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control command (outbound) or control signal / untagged output
    /// (inbound).
    Text(String),
    /// Raw session input (outbound) or raw terminal output (inbound).
    Binary(Vec<u8>),
}

/// Outbound half of a live connection. Cheap to clone; all clones feed the
/// same FIFO queue, so send order is preserved per socket.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl FrameSender {
    /// Whether the socket is observably open right now. The answer can go
    /// stale immediately; `send` re-checks.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    /// Queue a frame if the socket is still open. Returns false when the
    /// frame was dropped because the socket closed.
    pub fn send(&self, frame: Frame) -> bool {
        self.is_open() && self.tx.send(frame).is_ok()
    }

    /// Mark the socket closed so no further frames are accepted. The pump
    /// shuts down once the last sender clone is dropped.
    pub fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// A freshly dialed socket: the outbound sender plus the inbound frame
/// stream. The receiver yields `None` once the socket is gone.
pub struct Connection {
    pub tx: FrameSender,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

/// Dials sockets. The production implementation speaks WebSocket; tests
/// substitute an in-memory pair.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Connection, LinkError>>;
}

/// `tokio-tungstenite` based connector.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Connection, LinkError>> {
        Box::pin(async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| LinkError::Connect(e.to_string()))?;
            let (mut ws_write, mut ws_read) = stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
            let open = Arc::new(AtomicBool::new(true));
            let pump_open = open.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = ws_read.next() => match msg {
                            Some(Ok(Message::Binary(data))) => {
                                if in_tx.send(Frame::Binary(data)).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(Frame::Text(text)).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                debug!("[socket] receive error: {}", e);
                                break;
                            }
                        },
                        out = out_rx.recv() => match out {
                            Some(frame) => {
                                let msg = match frame {
                                    Frame::Text(text) => Message::Text(text),
                                    Frame::Binary(data) => Message::Binary(data),
                                };
                                if ws_write.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            // Owner dropped the sender: polite close.
                            None => {
                                let _ = ws_write.send(Message::Close(None)).await;
                                break;
                            }
                        },
                    }
                }
                pump_open.store(false, Ordering::Relaxed);
            });

            Ok(Connection {
                tx: FrameSender { tx: out_tx, open },
                rx: in_rx,
            })
        })
    }
}
