//! WebSocket transport layer.
//!
//! A transport is the single physical WebSocket connection carrying every
//! channel between one client and one server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Outbound (mpsc)   ┌──────────────────┐   WebSocket
//! │  Channel(s)  │────────────────────►│   run_session    │◄───────────► peer
//! └──────────────┘                     │  (one task)      │
//!        ▲                             └────────┬─────────┘
//!        │      handle_incoming_frame           │
//!        └───────────── Multiplexer ◄───────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-transport event loop |
//! | `keepalive` | Ping based liveness checks |
//! | `outbound` | Frame queue shared by all channels |

// ============================================================================
// Submodules
// ============================================================================

/// Per-transport event loop.
pub mod connection;

/// Ping-based liveness checks.
pub mod keepalive;

/// Outgoing frame sink.
pub mod outbound;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{OpenCallback, SessionEnd};
pub(crate) use connection::{OpenRequest, SessionCommand, run_session};
pub use keepalive::{DEFAULT_CHECK_ALIVE_INTERVAL, KeepAlive, Liveness};
pub use outbound::{Outbound, TransportState};
