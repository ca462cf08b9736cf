//! Channel multiplexing over one transport.
//!
//! # Architecture
//!
//! ```text
//!   socket text message
//!          │
//!          ▼
//!   Multiplexer::handle_incoming_frame
//!          │
//!          ├── open  ──► Router::route ──► handler ──► Channel::ready
//!          │
//!          └── ready / data / close ──► registry ──► Channel::handle_message
//! ```
//!
//! Channels send through an [`Outbound`](crate::transport::Outbound)
//! sink drained by the transport task.

// ============================================================================
// Submodules
// ============================================================================

/// Frame dispatch and channel registry.
pub mod core;

/// Instrumentation hook.
pub mod observer;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Multiplexer, Side};
pub use observer::{MessagingObserver, NoopObserver, TracingObserver};
