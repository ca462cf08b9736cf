//! Connecting side.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Reconnecting transport handle |
//! | [`ClientBuilder`] | Validating builder |
//! | [`ClientOptions`] | Reconnect policy and keep-alive |
//! | [`ConnectionState`] | Observable transport state |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for client configuration.
pub mod builder;

/// Supervisor task and client handle.
pub mod core;

/// Client options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Client, ConnectionState};
pub use builder::ClientBuilder;
pub use options::{
    ClientOptions, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_GROW_FACTOR, DEFAULT_MAX_RECONNECT_DELAY,
    DEFAULT_MIN_RECONNECT_DELAY, ReconnectOptions,
};
