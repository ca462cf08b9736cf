//! Logical channels.
//!
//! A channel is one independently closable stream multiplexed over a
//! shared transport. Channels are created by the
//! [`Multiplexer`](crate::mux::Multiplexer), never directly.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Channel`] | Handle with the handshake, send and close operations |
//! | [`ChannelState`] | Lifecycle state |
//! | [`CloseEvent`] | Code and reason delivered to close listeners |

// ============================================================================
// Submodules
// ============================================================================

/// Channel state machine and listener dispatch.
pub mod core;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Channel, CloseEvent, CloseListener, ErrorListener, MessageListener, ReadyListener};
pub use state::ChannelState;
