//! Outgoing frame sink shared by all channels of one transport.
//!
//! Channels never touch the socket. They push frames into an unbounded
//! queue drained by the transport task, which keeps every write for one
//! transport on a single task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::mux::{MessagingObserver, NoopObserver};
use crate::protocol::Frame;

// ============================================================================
// TransportState
// ============================================================================

/// Socket state as seen by senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TransportState {
    /// Frames are accepted.
    Open = 0,
    /// Close handshake started; frames are dropped.
    Closing = 1,
    /// Socket gone; frames are dropped.
    Closed = 2,
}

impl TransportState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Cloneable handle for queueing frames onto a transport.
#[derive(Clone)]
pub struct Outbound {
    /// Queue drained by the transport task.
    tx: mpsc::UnboundedSender<Frame>,
    /// Shared with every clone; written by the transport task.
    state: Arc<AtomicU8>,
    /// Notified for each accepted frame.
    observer: Arc<dyn MessagingObserver>,
}

impl Outbound {
    /// Creates a sink and the receiver the transport task drains.
    #[must_use]
    pub fn channel(
        observer: Arc<dyn MessagingObserver>,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Self {
            tx,
            state: Arc::new(AtomicU8::new(TransportState::Open as u8)),
            observer,
        };
        (outbound, rx)
    }

    /// Creates a sink with the no-op observer.
    #[must_use]
    pub fn unobserved() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        Self::channel(Arc::new(NoopObserver))
    }

    /// Returns the current transport state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while frames can still reach the socket.
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.state() < TransportState::Closing && !self.tx.is_closed()
    }

    /// Updates the transport state. States only move forward.
    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    /// Queues a frame for sending.
    ///
    /// This is a best-effort guard: a frame accepted here can still be
    /// lost if the socket dies before the transport task writes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is closing or gone.
    pub fn send(&self, frame: Frame) -> Result<()> {
        if self.state() >= TransportState::Closing {
            trace!(channel_id = %frame.id(), kind = %frame.kind(), "Transport closing, frame dropped");
            return Err(Error::ConnectionClosed);
        }

        self.observer.on_frame_sent(&frame);
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    /// Returns the observer attached to this transport.
    #[inline]
    pub(crate) fn observer(&self) -> &Arc<dyn MessagingObserver> {
        &self.observer
    }
}

// ============================================================================
// Tests
// ============================================================================
