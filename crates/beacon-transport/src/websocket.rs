//! WebSocket transport implementation.
//!
//! The hub writes through a [`WebSocketTransport`], which only pushes frames
//! onto an unbounded queue. A separate [`write_loop`] task owns the socket's
//! sink and drains that queue, so a slow peer never stalls the caller.

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::traits::{Transport, TransportError};

/// A frame waiting in a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// A close frame; the writer stops after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Receiving end of a connection's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A WebSocket connection's write handle.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    remote_addr: Option<SocketAddr>,
    is_open: AtomicBool,
}

impl WebSocketTransport {
    /// Create a transport and the receiver its writer task should drain.
    #[must_use]
    pub fn new(remote_addr: Option<SocketAddr>) -> (Arc<Self>, OutboundReceiver) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbound,
            remote_addr,
            is_open: AtomicBool::new(true),
        });
        (transport, rx)
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("remote_addr", &self.remote_addr)
            .field("is_open", &self.is_open())
            .finish()
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.outbound
            .send(Outbound::Text(text.to_owned()))
            .map_err(|_| {
                // Writer task is gone.
                self.is_open.store(false, Ordering::SeqCst);
                TransportError::ConnectionClosed
            })
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Drain an outbound queue into a WebSocket sink.
///
/// Returns when the queue is exhausted (every transport handle dropped),
/// after a close frame was written, or on the first write error.
pub async fn write_loop<S>(mut sink: S, mut outbound: OutboundReceiver)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                trace!(bytes = text.len(), "Writing text frame");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                debug!(code, reason = %reason, "Writing close frame");
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "Failed to send close frame");
                }
                break;
            }
        }
    }

    // Anything queued after this point is rejected with ConnectionClosed.
    outbound.close();

    if let Err(e) = sink.close().await {
        trace!(error = %e, "WebSocket sink close failed");
    }
}
