//! Wire frame types.
//!
//! Every WebSocket text message carries exactly one [`Frame`], encoded as
//! JSON and tagged by `kind`.
//!
//! # Format
//!
//! ```json
//! { "kind": "open",  "id": 200, "path": "/services/echo" }
//! { "kind": "ready", "id": 200 }
//! { "kind": "data",  "id": 200, "content": "..." }
//! { "kind": "close", "id": 200, "code": 1000, "reason": "done" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str, to_string};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

// ============================================================================
// Close Codes
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away (server shutdown, client navigating away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Connection dropped without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// The accepting side failed to service the channel.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

// ============================================================================
// Frame
// ============================================================================

/// A single multiplexing protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    /// Request to open a channel for a service path.
    Open {
        /// Channel id chosen by the initiator.
        id: ChannelId,
        /// Service path to route.
        path: String,
    },

    /// The path was routed and the channel is open.
    Ready {
        /// Channel id.
        id: ChannelId,
    },

    /// Application payload.
    Data {
        /// Channel id.
        id: ChannelId,
        /// Opaque payload, never interpreted by the multiplexer.
        content: String,
    },

    /// Channel closed by the sender.
    Close {
        /// Channel id.
        id: ChannelId,
        /// Close code.
        #[serde(default = "default_close_code")]
        code: u16,
        /// Human readable reason.
        #[serde(default)]
        reason: String,
    },
}

fn default_close_code() -> u16 {
    CLOSE_NORMAL
}

impl Frame {
    /// Creates an `open` frame.
    #[inline]
    #[must_use]
    pub fn open(id: ChannelId, path: impl Into<String>) -> Self {
        Self::Open {
            id,
            path: path.into(),
        }
    }

    /// Creates a `ready` frame.
    #[inline]
    #[must_use]
    pub const fn ready(id: ChannelId) -> Self {
        Self::Ready { id }
    }

    /// Creates a `data` frame.
    #[inline]
    #[must_use]
    pub fn data(id: ChannelId, content: impl Into<String>) -> Self {
        Self::Data {
            id,
            content: content.into(),
        }
    }

    /// Creates a `close` frame.
    #[inline]
    #[must_use]
    pub fn close(id: ChannelId, code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            id,
            code,
            reason: reason.into(),
        }
    }

    /// Returns the channel id this frame refers to.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        match self {
            Self::Open { id, .. }
            | Self::Ready { id }
            | Self::Data { id, .. }
            | Self::Close { id, .. } => *id,
        }
    }

    /// Returns the frame kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Open { .. } => FrameKind::Open,
            Self::Ready { .. } => FrameKind::Ready,
            Self::Data { .. } => FrameKind::Data,
            Self::Close { .. } => FrameKind::Close,
        }
    }

    /// Parses a frame from a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a valid frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }

    /// Serializes the frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        to_string(self).map_err(Error::from)
    }

    /// Best-effort extraction of the channel id from a message that
    /// failed to decode, for diagnostics only.
    #[must_use]
    pub fn peek_id(text: &str) -> Option<ChannelId> {
        from_str::<Value>(text)
            .ok()?
            .get("id")?
            .as_u64()
            .map(ChannelId::new)
    }
}

// ============================================================================
// FrameKind
// ============================================================================

/// Frame kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `open`
    Open,
    /// `ready`
    Ready,
    /// `data`
    Data,
    /// `close`
    Close,
}

impl FrameKind {
    /// Wire name of the kind.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Ready => "ready",
            Self::Data => "data",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_wire_format() {
        let json = Frame::open(ChannelId::new(200), "/echo/42")
            .encode()
            .expect("encode");
        let value: Value = from_str(&json).expect("json");
        assert_eq!(value["kind"], "open");
        assert_eq!(value["id"], 200);
        assert_eq!(value["path"], "/echo/42");
    }

    #[test]
    fn test_decode_data() {
        let frame = Frame::decode(r#"{"kind":"data","id":7,"content":"ping"}"#).expect("decode");
        assert_eq!(frame, Frame::data(ChannelId::new(7), "ping"));
        assert_eq!(frame.kind(), FrameKind::Data);
        assert_eq!(frame.id(), ChannelId::new(7));
    }

    #[test]
    fn test_decode_close_without_reason() {
        let frame = Frame::decode(r#"{"kind":"close","id":3}"#).expect("decode");
        assert_eq!(frame, Frame::close(ChannelId::new(3), CLOSE_NORMAL, ""));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let result = Frame::decode(r#"{"kind":"nack","id":3}"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert!(Frame::decode(r#"{"kind":"open","id":3}"#).is_err());
        assert!(Frame::decode(r#"{"kind":"data","id":3}"#).is_err());
    }

    #[test]
    fn test_peek_id() {
        assert_eq!(
            Frame::peek_id(r#"{"kind":"bogus","id":11}"#),
            Some(ChannelId::new(11))
        );
        assert_eq!(Frame::peek_id("not json"), None);
        assert_eq!(Frame::peek_id(r#"{"kind":"data"}"#), None);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FrameKind::Ready.to_string(), "ready");
    }
}
