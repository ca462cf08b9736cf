//! Frame dispatch and channel registry for one transport.
//!
//! The multiplexer decodes every incoming text message, creates channels
//! for `open` frames by routing their path, and forwards the remaining
//! frames to the registered channel. All dispatch for one transport
//! happens on that transport's task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelState};
use crate::error::{Error, Result};
use crate::identifiers::{
    CLIENT_CHANNEL_ID_SEED, ChannelId, ChannelIdAllocator, ConnectionId, SERVER_CHANNEL_ID_SEED,
};
use crate::protocol::{CLOSE_ABNORMAL, CLOSE_INTERNAL_ERROR, Frame};
use crate::router::Router;
use crate::transport::Outbound;

use super::MessagingObserver;

// ============================================================================
// Types
// ============================================================================

type Registry = Arc<Mutex<FxHashMap<ChannelId, Channel>>>;

/// Which end of the transport a multiplexer serves.
///
/// Decides the id range for locally opened channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Connecting side.
    Client,
    /// Accepting side.
    Server,
}

impl Side {
    fn allocator(self) -> ChannelIdAllocator {
        match self {
            Self::Client => ChannelIdAllocator::client(),
            Self::Server => ChannelIdAllocator::server(),
        }
    }

    /// Returns `true` if `id` lies in the range this side allocates from.
    fn owns(self, id: ChannelId) -> bool {
        match self {
            Self::Client => (CLIENT_CHANNEL_ID_SEED..SERVER_CHANNEL_ID_SEED).contains(&id.as_u64()),
            Self::Server => id.as_u64() >= SERVER_CHANNEL_ID_SEED,
        }
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Owns the live channels of one transport.
pub struct Multiplexer {
    connection_id: ConnectionId,
    side: Side,
    ids: ChannelIdAllocator,
    outbound: Outbound,
    router: Option<Arc<Router>>,
    channels: Registry,
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("connection_id", &self.connection_id)
            .field("side", &self.side)
            .field("channels", &self.channel_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Multiplexer - Constructor & Accessors
// ============================================================================

impl Multiplexer {
    /// Creates a multiplexer for a fresh transport.
    ///
    /// Without a router every incoming `open` is unroutable.
    #[must_use]
    pub fn new(side: Side, outbound: Outbound, router: Option<Arc<Router>>) -> Self {
        Self::with_connection_id(ConnectionId::generate(), side, outbound, router)
    }

    /// Creates a multiplexer for a transport whose id is already assigned.
    #[must_use]
    pub fn with_connection_id(
        connection_id: ConnectionId,
        side: Side,
        outbound: Outbound,
        router: Option<Arc<Router>>,
    ) -> Self {
        Self {
            connection_id,
            side,
            ids: side.allocator(),
            outbound,
            router,
            channels: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Returns the transport's connection id.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns which side this multiplexer serves.
    #[inline]
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Returns the number of registered channels.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Returns a registered channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.lock().get(&id).cloned()
    }

    /// Returns the outgoing frame sink.
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    fn observer(&self) -> &Arc<dyn MessagingObserver> {
        self.outbound.observer()
    }

    /// Creates a channel whose close removes it from the registry.
    fn create_channel(&self, id: ChannelId) -> Channel {
        let channel = Channel::new(id, self.outbound.clone());
        let registry = Arc::downgrade(&self.channels);

        channel.on_close(move |_| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut channels = registry.lock();
            if channels.get(&id).is_some_and(Channel::is_closed) {
                channels.remove(&id);
                trace!(channel_id = %id, "Channel unregistered");
            }
        });

        channel
    }
}

// ============================================================================
// Multiplexer - Outgoing
// ============================================================================

impl Multiplexer {
    /// Opens a channel to a peer service.
    ///
    /// `on_open` fires once the peer answers with `ready`. It never fires
    /// if the channel closes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is gone. The
    /// channel is closed and unregistered in that case.
    pub fn open_channel<F>(&self, path: &str, on_open: F) -> Result<Channel>
    where
        F: FnOnce(&Channel) + Send + 'static,
    {
        let id = self.ids.allocate();
        let channel = self.create_channel(id);
        channel.on_ready(on_open);

        self.channels.lock().insert(id, channel.clone());

        if let Err(e) = channel.open(path) {
            debug!(
                connection_id = %self.connection_id,
                channel_id = %id,
                error = %e,
                "Channel open failed"
            );
            channel.close(CLOSE_ABNORMAL, e.to_string());
            return Err(e);
        }

        Ok(channel)
    }
}

// ============================================================================
// Multiplexer - Incoming
// ============================================================================

impl Multiplexer {
    /// Decodes and dispatches one text message.
    ///
    /// Never fails: malformed frames, unknown channels and frames invalid
    /// for a channel's state are logged and dropped.
    pub fn handle_incoming_frame(&self, raw: &str) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                let channel_id = Frame::peek_id(raw);
                warn!(
                    connection_id = %self.connection_id,
                    ?channel_id,
                    error = %e,
                    "Dropping malformed frame"
                );
                self.observer().on_error(channel_id, &e);
                return;
            }
        };

        self.observer().on_frame_received(&frame);

        match frame {
            Frame::Open { id, path } => self.accept_channel(id, &path),
            other => self.forward(other),
        }
    }

    fn accept_channel(&self, id: ChannelId, path: &str) {
        if self.side.owns(id) {
            self.report(
                Some(id),
                &Error::protocol(format!("peer opened channel {id} in the local id range")),
            );
            return;
        }
        if self.channels.lock().contains_key(&id) {
            self.report(Some(id), &Error::duplicate_channel(id));
            return;
        }

        let channel = self.create_channel(id);
        if let Err(e) = channel.accept(path) {
            self.report(Some(id), &e);
            return;
        }

        let routed = self
            .router
            .as_ref()
            .and_then(|router| router.route(path, &channel));

        let Some(resolved) = routed else {
            warn!(
                connection_id = %self.connection_id,
                channel_id = %id,
                path = %path,
                "Cannot find a service for the path"
            );
            self.observer()
                .on_error(Some(id), &Error::route_not_found(path));
            self.reject(&channel);
            return;
        };

        {
            let mut channels = self.channels.lock();
            if channel.is_closed() {
                return;
            }
            channels.insert(id, channel.clone());
        }

        if channel.state() == ChannelState::Opening {
            if let Err(e) = channel.ready() {
                debug!(channel_id = %id, error = %e, "Ready not sent");
            }
        }

        trace!(
            connection_id = %self.connection_id,
            channel_id = %id,
            path = %resolved,
            "Channel accepted"
        );
    }

    /// Closes a channel no route accepted, so listeners a failed handler
    /// registered still fire. The peer only hears about it if a handler
    /// already sent `ready`.
    fn reject(&self, channel: &Channel) {
        match channel.state() {
            ChannelState::Open => channel.close(CLOSE_INTERNAL_ERROR, "no handler"),
            _ => channel.close_locally(CLOSE_INTERNAL_ERROR, "no handler"),
        }
    }

    fn forward(&self, frame: Frame) {
        let id = frame.id();
        let Some(channel) = self.channel(id) else {
            warn!(
                connection_id = %self.connection_id,
                channel_id = %id,
                kind = %frame.kind(),
                "The channel does not exist"
            );
            self.observer()
                .on_error(Some(id), &Error::unknown_channel(id));
            return;
        };

        if let Err(e) = channel.handle_message(frame) {
            self.report(Some(id), &e);
        }
    }

    fn report(&self, channel_id: Option<ChannelId>, error: &Error) {
        warn!(
            connection_id = %self.connection_id,
            ?channel_id,
            error = %error,
            "Frame dropped"
        );
        self.observer().on_error(channel_id, error);
    }
}

// ============================================================================
// Multiplexer - Transport Events
// ============================================================================

impl Multiplexer {
    /// Closes every channel after the transport closed.
    ///
    /// Each channel's close listeners see the transport's code and reason.
    /// The registry is empty afterwards.
    pub fn transport_closed(&self, code: u16, reason: &str) {
        let mut channels: Vec<Channel> = self
            .channels
            .lock()
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        channels.sort_by_key(Channel::id);

        if !channels.is_empty() {
            debug!(
                connection_id = %self.connection_id,
                count = channels.len(),
                code,
                reason = %reason,
                "Closing channels of closed transport"
            );
        }

        for channel in channels {
            channel.close(code, reason);
        }
    }

    /// Notifies every channel of a transport error.
    pub fn transport_error(&self, error: &Error) {
        let channels: Vec<Channel> = self.channels.lock().values().cloned().collect();
        self.observer().on_error(None, error);
        for channel in channels {
            channel.fire_error(error);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
