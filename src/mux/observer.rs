//! Optional instrumentation hook.
//!
//! A [`MessagingObserver`] sees every frame a multiplexer sends or
//! receives, plus every error it swallows. The default is
//! [`NoopObserver`]; nothing in the protocol depends on an observer.

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::Error;
use crate::identifiers::ChannelId;
use crate::protocol::Frame;

// ============================================================================
// MessagingObserver
// ============================================================================

/// Receives notifications about frame traffic on one or more transports.
///
/// Called synchronously on the transport task, so implementations must
/// not block.
pub trait MessagingObserver: Send + Sync {
    /// A frame was handed to the transport for sending.
    fn on_frame_sent(&self, _frame: &Frame) {}

    /// A frame was received and decoded.
    fn on_frame_received(&self, _frame: &Frame) {}

    /// An error was logged and swallowed.
    fn on_error(&self, _channel_id: Option<ChannelId>, _error: &Error) {}
}

// ============================================================================
// NoopObserver
// ============================================================================

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MessagingObserver for NoopObserver {}

// ============================================================================
// TracingObserver
// ============================================================================

/// Observer that emits a `trace!` event per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MessagingObserver for TracingObserver {
    fn on_frame_sent(&self, frame: &Frame) {
        trace!(channel_id = %frame.id(), kind = %frame.kind(), "Frame sent");
    }

    fn on_frame_received(&self, frame: &Frame) {
        trace!(channel_id = %frame.id(), kind = %frame.kind(), "Frame received");
    }

    fn on_error(&self, channel_id: Option<ChannelId>, error: &Error) {
        trace!(?channel_id, error = %error, "Frame error");
    }
}
