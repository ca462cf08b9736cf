//! Server configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wschannel::ServerOptions;
//!
//! let options = ServerOptions::new()
//!     .with_port(8080)
//!     .with_ws_path("/services")
//!     .with_check_alive_interval(Duration::from_secs(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::DEFAULT_CHECK_ALIVE_INTERVAL;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default HTTP path upgraded to the multiplexed WebSocket.
pub const DEFAULT_WS_PATH: &str = "/services";

// ============================================================================
// ServerOptions
// ============================================================================

/// Listener and transport settings of a [`Server`](super::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address to bind.
    pub bind_ip: IpAddr,

    /// Port to bind, 0 for a random free port.
    pub port: u16,

    /// Only upgrades on this path are accepted; others get 404.
    pub ws_path: String,

    /// Keep-alive interval, `None` to disable pings.
    pub check_alive_interval: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServerOptions {
    /// Creates options with defaults: localhost, random port,
    /// `/services`, 30 s keep-alive.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            bind_ip: DEFAULT_BIND_IP,
            port: 0,
            ws_path: DEFAULT_WS_PATH.to_string(),
            check_alive_interval: Some(DEFAULT_CHECK_ALIVE_INTERVAL),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServerOptions {
    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the WebSocket path.
    #[inline]
    #[must_use]
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Sets the keep-alive interval.
    #[inline]
    #[must_use]
    pub fn with_check_alive_interval(mut self, interval: Duration) -> Self {
        self.check_alive_interval = Some(interval);
        self
    }

    /// Disables keep-alive pings.
    #[inline]
    #[must_use]
    pub fn without_keepalive(mut self) -> Self {
        self.check_alive_interval = None;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServerOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the path does not start with `/` or the
    /// keep-alive interval is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(Error::config(format!(
                "WebSocket path must start with '/': {}",
                self.ws_path
            )));
        }

        if self.check_alive_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config("Keep-alive interval must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
