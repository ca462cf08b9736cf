//! Accepting side.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Server`] | Accept loop and table of live transports |
//! | [`ServerBuilder`] | Validating builder |
//! | [`ServerOptions`] | Bind address, WebSocket path, keep-alive |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for server configuration.
pub mod builder;

/// Accept loop and connection table.
pub mod core;

/// Server options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{ConnectionRouterFactory, Server};
pub use builder::ServerBuilder;
pub use options::{DEFAULT_BIND_IP, DEFAULT_WS_PATH, ServerOptions};
