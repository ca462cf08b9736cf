//! WebSocket protocol message types.
//!
//! This module defines the frame format shared by both ends of a
//! multiplexed connection.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `open` | Initiator → Peer | Request a channel for a service path |
//! | `ready` | Peer → Initiator | Path routed, channel open |
//! | `data` | Either | Application payload |
//! | `close` | Either | Channel closed |
//!
//! There is no negative acknowledgement: an `open` that cannot be routed
//! is never answered, and the initiator applies its own timeout.

// ============================================================================
// Submodules
// ============================================================================

/// Frame definitions and JSON codec.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, Frame, FrameKind,
};
