//! Error types for wschannel.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wschannel::{Channel, Result};
//!
//! fn greet(channel: &Channel) -> Result<()> {
//!     channel.send("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidRoute`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::UnknownChannel`], [`Error::DuplicateChannel`] |
//! | Channel | [`Error::InvalidState`], [`Error::ChannelOpenTimeout`] |
//! | Routing | [`Error::RouteNotFound`], [`Error::Handler`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::panic::{self, AssertUnwindSafe};
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::channel::ChannelState;
use crate::identifiers::ChannelId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client or server configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Route pattern could not be compiled.
    #[error("Invalid route pattern '{pattern}': {message}")]
    InvalidRoute {
        /// The offending pattern.
        pattern: String,
        /// Why the pattern was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when WebSocket connection cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt timed out.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed.
    ///
    /// Returned when the transport is gone during an operation.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation.
    ///
    /// Malformed frame, or a frame kind that is invalid for the
    /// channel's current state.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Frame referenced a channel id that is not registered.
    #[error("Channel does not exist: {channel_id}")]
    UnknownChannel {
        /// The unknown channel id.
        channel_id: ChannelId,
    },

    /// Peer tried to open a channel with an id that is already live.
    #[error("Channel already exists: {channel_id}")]
    DuplicateChannel {
        /// The duplicated channel id.
        channel_id: ChannelId,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Operation is not valid in the channel's current state.
    #[error("Cannot {operation} channel {channel_id} in state {state}")]
    InvalidState {
        /// Channel the operation was attempted on.
        channel_id: ChannelId,
        /// State the channel was in.
        state: ChannelState,
        /// The attempted operation.
        operation: &'static str,
    },

    /// The peer never answered an `open` with `ready`.
    #[error("Channel open for '{path}' timed out after {timeout_ms}ms")]
    ChannelOpenTimeout {
        /// Requested service path.
        path: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// No route accepted the path.
    #[error("Cannot find a service for the path: {path}")]
    RouteNotFound {
        /// The unrouted path.
        path: String,
    },

    /// An application handler failed or panicked.
    #[error("Handler failed: {message}")]
    Handler {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid route error.
    #[inline]
    pub fn invalid_route(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRoute {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown channel error.
    #[inline]
    pub fn unknown_channel(channel_id: ChannelId) -> Self {
        Self::UnknownChannel { channel_id }
    }

    /// Creates a duplicate channel error.
    #[inline]
    pub fn duplicate_channel(channel_id: ChannelId) -> Self {
        Self::DuplicateChannel { channel_id }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(
        channel_id: ChannelId,
        state: ChannelState,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            channel_id,
            state,
            operation,
        }
    }

    /// Creates a channel open timeout error.
    #[inline]
    pub fn channel_open_timeout(path: impl Into<String>, timeout_ms: u64) -> Self {
        Self::ChannelOpenTimeout {
            path: path.into(),
            timeout_ms,
        }
    }

    /// Creates a route not found error.
    #[inline]
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::ChannelOpenTimeout { .. }
        )
    }

    /// Returns `true` if this error is a protocol violation.
    ///
    /// Protocol violations drop the offending frame but never the transport.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::UnknownChannel { .. }
                | Self::DuplicateChannel { .. }
                | Self::Json(_)
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ChannelOpenTimeout { .. }
                | Self::RouteNotFound { .. }
        )
    }
}

// ============================================================================
// Handler Boundary
// ============================================================================

/// Runs application code, converting a panic into [`Error::Handler`].
///
/// Used wherever the crate invokes user callbacks on the transport task,
/// so that one misbehaving handler cannot take the connection down.
pub(crate) fn catch_handler_panic<R>(f: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        Error::handler(message)
    })
}

// ============================================================================
// Tests
// ============================================================================
