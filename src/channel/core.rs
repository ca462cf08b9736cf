//! Channel state machine and listener dispatch.
//!
//! A [`Channel`] is a cheap cloneable handle. All clones share one state
//! machine guarded by a mutex; listeners are always invoked after that
//! mutex is released, so they may freely call back into the channel.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::slice;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result, catch_handler_panic};
use crate::identifiers::ChannelId;
use crate::protocol::Frame;
use crate::transport::Outbound;

use super::ChannelState;

// ============================================================================
// Types
// ============================================================================

/// Called for each `data` payload, in arrival order.
pub type MessageListener = Arc<dyn Fn(&Channel, &str) + Send + Sync>;

/// Called when the transport reports an error for this channel.
pub type ErrorListener = Arc<dyn Fn(&Channel, &Error) + Send + Sync>;

/// Called once when the channel reaches [`ChannelState::Open`].
pub type ReadyListener = Box<dyn FnOnce(&Channel) + Send>;

/// Called once when the channel reaches [`ChannelState::Closed`].
pub type CloseListener = Box<dyn FnOnce(&CloseEvent) + Send>;

// ============================================================================
// CloseEvent
// ============================================================================

/// Why a channel closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code (WebSocket close code semantics).
    pub code: u16,
    /// Human readable reason.
    pub reason: String,
}

// ============================================================================
// ChannelCore
// ============================================================================

/// Mutable channel state.
#[derive(Default)]
struct ChannelCore {
    state: ChannelState,
    /// Service path, set by `open` or `accept`.
    path: Option<String>,
    /// `true` when this side sent the `open` frame.
    initiator: bool,
    /// Payloads sent while `Opening`, flushed on `ready`.
    outgoing: VecDeque<String>,
    /// Payloads received before any message listener was registered.
    inbox: VecDeque<String>,
    ready_listeners: Vec<ReadyListener>,
    close_listeners: Vec<CloseListener>,
    message_listeners: Vec<MessageListener>,
    error_listeners: Vec<ErrorListener>,
    /// Recorded at `Closed` for late `on_close` registrations.
    close_event: Option<CloseEvent>,
}

struct ChannelInner {
    id: ChannelId,
    outbound: Outbound,
    core: Mutex<ChannelCore>,
    /// Serializes message delivery so backlog and live payloads never interleave.
    dispatch: ReentrantMutex<()>,
}

// ============================================================================
// Channel
// ============================================================================

/// A logical, independently closable stream multiplexed over a transport.
///
/// # Thread Safety
///
/// `Channel` is `Send + Sync` and can be cloned into handlers and tasks.
/// Sends never block: frames are queued onto the owning transport.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &core.state)
            .field("path", &core.path)
            .finish()
    }
}

// ============================================================================
// Channel - Constructor & Accessors
// ============================================================================

impl Channel {
    /// Creates a channel in [`ChannelState::Initial`] bound to a transport.
    pub(crate) fn new(id: ChannelId, outbound: Outbound) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id,
                outbound,
                core: Mutex::new(ChannelCore::default()),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.core.lock().state
    }

    /// Returns the service path once the handshake has started.
    #[must_use]
    pub fn path(&self) -> Option<String> {
        self.inner.core.lock().path.clone()
    }

    /// Returns `true` if the channel is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Returns `true` if the channel is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Returns how many payloads are waiting for `ready`.
    #[inline]
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.inner.core.lock().outgoing.len()
    }

    /// Returns the close code and reason once closed.
    #[must_use]
    pub fn close_event(&self) -> Option<CloseEvent> {
        self.inner.core.lock().close_event.clone()
    }

    /// Returns `true` if both handles refer to the same channel.
    #[inline]
    #[must_use]
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Channel - Handshake
// ============================================================================

impl Channel {
    /// Starts the handshake from the initiating side.
    ///
    /// Sends `open` and moves to [`ChannelState::Opening`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the channel is `Initial`
    /// - [`Error::ConnectionClosed`] if the transport is gone
    pub fn open(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        let mut core = self.inner.core.lock();

        if core.state != ChannelState::Initial {
            return Err(Error::invalid_state(self.id(), core.state, "open"));
        }

        self.inner.outbound.send(Frame::open(self.id(), path.clone()))?;

        trace!(channel_id = %self.id(), path = %path, "Channel opening");
        core.state = ChannelState::Opening;
        core.initiator = true;
        core.path = Some(path);
        Ok(())
    }

    /// Records an `open` received from the peer.
    ///
    /// Moves to [`ChannelState::Opening`] without sending anything; the
    /// routed handler (or the multiplexer) then calls [`Channel::ready`].
    pub(crate) fn accept(&self, path: &str) -> Result<()> {
        let mut core = self.inner.core.lock();

        if core.state != ChannelState::Initial {
            return Err(Error::invalid_state(self.id(), core.state, "accept"));
        }

        core.state = ChannelState::Opening;
        core.initiator = false;
        core.path = Some(path.to_string());
        Ok(())
    }

    /// Completes the handshake from the accepting side.
    ///
    /// Sends `ready`, moves to [`ChannelState::Open`] and flushes payloads
    /// buffered while opening.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the channel is `Opening`
    /// - [`Error::Protocol`] if this side initiated the channel
    /// - [`Error::ConnectionClosed`] if the transport is gone
    pub fn ready(&self) -> Result<()> {
        let listeners = {
            let mut core = self.inner.core.lock();

            if core.state != ChannelState::Opening {
                return Err(Error::invalid_state(self.id(), core.state, "ready"));
            }
            if core.initiator {
                return Err(Error::protocol(format!(
                    "channel {} was opened locally, only the peer sends ready",
                    self.id()
                )));
            }

            self.inner.outbound.send(Frame::ready(self.id()))?;
            self.complete_open(&mut core)
        };

        self.fire_ready(listeners);
        Ok(())
    }

    /// Moves to `Open`, flushes buffered payloads, hands back ready listeners.
    fn complete_open(&self, core: &mut ChannelCore) -> Vec<ReadyListener> {
        core.state = ChannelState::Open;

        let buffered = mem::take(&mut core.outgoing);
        if !buffered.is_empty() {
            trace!(channel_id = %self.id(), count = buffered.len(), "Flushing buffered payloads");
        }
        for content in buffered {
            if let Err(e) = self.inner.outbound.send(Frame::data(self.id(), content)) {
                debug!(channel_id = %self.id(), error = %e, "Failed to flush buffered payload");
                break;
            }
        }

        mem::take(&mut core.ready_listeners)
    }

    fn fire_ready(&self, listeners: Vec<ReadyListener>) {
        debug!(channel_id = %self.id(), "Channel open");
        for listener in listeners {
            if let Err(e) = catch_handler_panic(|| listener(self)) {
                self.report_handler_failure("Ready listener failed", &e);
            }
        }
    }
}

// ============================================================================
// Channel - Messaging
// ============================================================================

impl Channel {
    /// Sends a payload to the peer.
    ///
    /// While `Opening` the payload is buffered until `ready`. Sending on a
    /// closing or closed channel is logged and ignored, since consumers
    /// routinely race a legitimate close.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the channel was never opened
    /// - [`Error::ConnectionClosed`] if the transport is gone
    pub fn send(&self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        let mut core = self.inner.core.lock();

        match core.state {
            ChannelState::Initial => Err(Error::invalid_state(self.id(), core.state, "send")),
            ChannelState::Opening => {
                core.outgoing.push_back(content);
                Ok(())
            }
            ChannelState::Open => self.inner.outbound.send(Frame::data(self.id(), content)),
            ChannelState::Closing | ChannelState::Closed => {
                warn!(channel_id = %self.id(), "Channel closed, payload dropped");
                Ok(())
            }
        }
    }

    /// Applies a frame received from the peer for this channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not valid for the
    /// current state. The channel is left untouched in that case.
    pub fn handle_message(&self, frame: Frame) -> Result<()> {
        if frame.id() != self.id() {
            return Err(Error::protocol(format!(
                "frame for channel {} delivered to channel {}",
                frame.id(),
                self.id()
            )));
        }

        match frame {
            Frame::Data { content, .. } => self.dispatch_message(content),
            Frame::Ready { .. } => {
                let listeners = {
                    let mut core = self.inner.core.lock();
                    if core.state != ChannelState::Opening || !core.initiator {
                        return Err(Error::protocol(format!(
                            "unexpected ready for channel {} in state {}",
                            self.id(),
                            core.state
                        )));
                    }
                    self.complete_open(&mut core)
                };
                self.fire_ready(listeners);
                Ok(())
            }
            Frame::Close { code, reason, .. } => {
                self.shutdown(code, reason, false);
                Ok(())
            }
            Frame::Open { .. } => Err(Error::protocol(format!(
                "open received for existing channel {}",
                self.id()
            ))),
        }
    }

    fn dispatch_message(&self, content: String) -> Result<()> {
        let _dispatch = self.inner.dispatch.lock();

        let listeners = {
            let mut core = self.inner.core.lock();
            match core.state {
                ChannelState::Open => {}
                ChannelState::Opening if !core.initiator => {}
                ChannelState::Closing | ChannelState::Closed => {
                    debug!(channel_id = %self.id(), "Channel closed, incoming payload dropped");
                    return Ok(());
                }
                state => {
                    return Err(Error::protocol(format!(
                        "data for channel {} before handshake (state {state})",
                        self.id()
                    )));
                }
            }

            if core.message_listeners.is_empty() {
                core.inbox.push_back(content);
                return Ok(());
            }
            core.message_listeners.clone()
        };

        self.deliver(&listeners, &content);
        Ok(())
    }

    fn deliver(&self, listeners: &[MessageListener], content: &str) {
        for listener in listeners {
            if let Err(e) = catch_handler_panic(|| listener(self, content)) {
                self.report_handler_failure("Message listener failed", &e);
            }
        }
    }
}

// ============================================================================
// Channel - Listeners
// ============================================================================

impl Channel {
    /// Registers a listener for incoming payloads.
    ///
    /// Payloads that arrived before the first listener was registered are
    /// delivered to it immediately, in order.
    pub fn on_message(&self, listener: impl Fn(&Channel, &str) + Send + Sync + 'static) {
        let _dispatch = self.inner.dispatch.lock();
        let listener: MessageListener = Arc::new(listener);

        let backlog = {
            let mut core = self.inner.core.lock();
            if core.state == ChannelState::Closed {
                return;
            }
            core.message_listeners.push(Arc::clone(&listener));
            mem::take(&mut core.inbox)
        };

        for content in backlog {
            self.deliver(slice::from_ref(&listener), &content);
        }
    }

    /// Registers a listener fired once when the channel opens.
    ///
    /// Fires immediately if the channel is already open, and never if it
    /// closes first.
    pub fn on_ready(&self, listener: impl FnOnce(&Channel) + Send + 'static) {
        let mut core = self.inner.core.lock();
        match core.state {
            ChannelState::Open => {
                drop(core);
                self.fire_ready(vec![Box::new(listener)]);
            }
            ChannelState::Closing | ChannelState::Closed => {}
            ChannelState::Initial | ChannelState::Opening => {
                core.ready_listeners.push(Box::new(listener));
            }
        }
    }

    /// Registers a listener fired exactly once when the channel closes.
    ///
    /// Fires immediately if the channel is already closed.
    pub fn on_close(&self, listener: impl FnOnce(&CloseEvent) + Send + 'static) {
        let mut core = self.inner.core.lock();
        match core.close_event.clone() {
            Some(event) => {
                drop(core);
                self.fire_close(vec![Box::new(listener)], &event);
            }
            None => core.close_listeners.push(Box::new(listener)),
        }
    }

    /// Registers a listener for transport errors.
    pub fn on_error(&self, listener: impl Fn(&Channel, &Error) + Send + Sync + 'static) {
        let mut core = self.inner.core.lock();
        if !core.state.is_closing_or_closed() {
            core.error_listeners.push(Arc::new(listener));
        }
    }

    /// Notifies error listeners. Does not change state.
    pub fn fire_error(&self, error: &Error) {
        let listeners = self.inner.core.lock().error_listeners.clone();
        for listener in &listeners {
            if let Err(e) = catch_handler_panic(|| listener(self, error)) {
                self.report_handler_failure("Error listener failed", &e);
            }
        }
    }

    fn report_handler_failure(&self, what: &str, e: &Error) {
        error!(channel_id = %self.id(), error = %e, "{what}");
        self.inner.outbound.observer().on_error(Some(self.id()), e);
    }
}

// ============================================================================
// Channel - Close
// ============================================================================

impl Channel {
    /// Closes the channel.
    ///
    /// Idempotent: closing a closing or closed channel does nothing. Sends
    /// `close` to the peer when the transport is still usable, then fires
    /// close listeners exactly once.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.shutdown(code, reason.into(), true);
    }

    /// Closes the channel without sending `close` to the peer.
    pub(crate) fn close_locally(&self, code: u16, reason: impl Into<String>) {
        self.shutdown(code, reason.into(), false);
    }

    fn shutdown(&self, code: u16, reason: String, notify_peer: bool) {
        let previous = {
            let mut core = self.inner.core.lock();
            if core.state.is_closing_or_closed() {
                return;
            }
            mem::replace(&mut core.state, ChannelState::Closing)
        };

        if notify_peer && previous != ChannelState::Initial && self.inner.outbound.is_usable() {
            if let Err(e) = self
                .inner
                .outbound
                .send(Frame::close(self.id(), code, reason.clone()))
            {
                debug!(channel_id = %self.id(), error = %e, "Close frame not sent");
            }
        }

        let event = CloseEvent { code, reason };
        let listeners = {
            let mut core = self.inner.core.lock();
            core.state = ChannelState::Closed;
            core.close_event = Some(event.clone());
            core.outgoing.clear();
            core.inbox.clear();
            core.ready_listeners.clear();
            core.message_listeners.clear();
            core.error_listeners.clear();
            mem::take(&mut core.close_listeners)
        };

        debug!(channel_id = %self.id(), code, reason = %event.reason, "Channel closed");
        self.fire_close(listeners, &event);
    }

    fn fire_close(&self, listeners: Vec<CloseListener>, event: &CloseEvent) {
        for listener in listeners {
            if let Err(e) = catch_handler_panic(|| listener(event)) {
                self.report_handler_failure("Close listener failed", &e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
