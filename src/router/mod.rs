//! Path routing for newly opened channels.
//!
//! When the peer opens a channel, its path is matched against a
//! [`Router`]. The first route whose handler accepts the channel wins;
//! unmatched paths fall through to the parent router, if any.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Router`] | Ordered route table |
//! | [`RouterBuilder`] | Assembles an immutable `Arc<Router>` |
//! | [`RoutePattern`] | Compiled `/literal/:param` pattern |
//! | [`PathParams`] | Parameters extracted by a match |

// ============================================================================
// Submodules
// ============================================================================

/// Route table and dispatch.
pub mod core;

/// Pattern compilation and matching.
pub mod pattern;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{ChannelHandler, RouteId, Router, RouterBuilder};
pub use pattern::{PathParams, RoutePattern};
