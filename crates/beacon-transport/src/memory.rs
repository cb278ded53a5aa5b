//! In-memory transport.
//!
//! Records every frame it is asked to send. Used by tests and by embedders
//! that drive the hub without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::{Transport, TransportError};

/// A transport that stores sent frames in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    frames: Mutex<Vec<String>>,
    closed_with: Mutex<Option<(u16, String)>>,
    is_open: AtomicBool,
}

impl MemoryTransport {
    /// Create a new open transport.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
            is_open: AtomicBool::new(true),
        })
    }

    /// All frames sent so far.
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all frames sent so far.
    pub fn take_frames(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Simulate the peer vanishing without a close handshake.
    pub fn drop_connection(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    /// The close code and reason, if [`Transport::close`] was called.
    #[must_use]
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_owned());
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if self.is_open.swap(false, Ordering::SeqCst) {
            *self
                .closed_with
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some((code, reason.to_owned()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
