//! Channel lifecycle states.
//!
//! ```text
//! Initial ──open()/accept──► Opening ──ready──► Open
//!    │                          │                 │
//!    └──────────────close()─────┴────────┬────────┘
//!                                        ▼
//!                                     Closing ──► Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle state of a [`Channel`](super::Channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// Created, no handshake yet.
    #[default]
    Initial,
    /// `open` sent (initiator) or received (acceptor), waiting for `ready`.
    Opening,
    /// Handshake complete, payloads flow immediately.
    Open,
    /// Close in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl ChannelState {
    /// Returns `true` once a close has started.
    #[inline]
    #[must_use]
    pub const fn is_closing_or_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Returns the state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Opening => "Opening",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
