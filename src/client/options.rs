//! Client configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wschannel::{ClientOptions, ReconnectOptions};
//!
//! let options = ClientOptions::new().with_reconnect(
//!     ReconnectOptions::new()
//!         .with_min_delay(Duration::from_millis(500))
//!         .with_max_retries(10),
//! );
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first reconnection attempt.
pub const DEFAULT_MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for reconnection delays.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(10000);

/// Growth of the delay per failed attempt.
pub const DEFAULT_GROW_FACTOR: f64 = 1.3;

/// Time allowed for one connection attempt.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(10000);

// ============================================================================
// ReconnectOptions
// ============================================================================

/// Reconnection policy.
///
/// The delay before attempt `n` (0-based) is
/// `min(max_delay, min_delay * grow_factor^n)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectOptions {
    /// Reconnect after the transport drops.
    pub enabled: bool,

    /// Delay before the first attempt.
    pub min_delay: Duration,

    /// Delay cap.
    pub max_delay: Duration,

    /// Delay multiplier per consecutive failure.
    pub grow_factor: f64,

    /// Timeout of a single connection attempt.
    pub connection_timeout: Duration,

    /// Consecutive failed attempts before giving up, `None` for unbounded.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectOptions {
    /// Creates the default policy.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: true,
            min_delay: DEFAULT_MIN_RECONNECT_DELAY,
            max_delay: DEFAULT_MAX_RECONNECT_DELAY,
            grow_factor: DEFAULT_GROW_FACTOR,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_retries: None,
        }
    }

    /// Creates a policy that never reconnects.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        let mut options = Self::new();
        options.enabled = false;
        options
    }

    /// Sets the first delay.
    #[inline]
    #[must_use]
    pub const fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub const fn with_grow_factor(mut self, factor: f64) -> Self {
        self.grow_factor = factor;
        self
    }

    /// Sets the per-attempt connection timeout.
    #[inline]
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Limits consecutive failed attempts.
    #[inline]
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Returns the delay before attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.min_delay.as_secs_f64() * self.grow_factor.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the delays are inverted, the growth
    /// factor is below 1 or the connection timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.min_delay > self.max_delay {
            return Err(Error::config(format!(
                "Reconnect min delay {:?} exceeds max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        if !(self.grow_factor >= 1.0 && self.grow_factor.is_finite()) {
            return Err(Error::config(format!(
                "Reconnect grow factor must be a finite value >= 1, got {}",
                self.grow_factor
            )));
        }
        if self.connection_timeout.is_zero() {
            return Err(Error::config("Connection timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Transport settings of a [`Client`](super::Client).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClientOptions {
    /// Reconnection policy.
    pub reconnect: ReconnectOptions,

    /// Client side keep-alive interval, `None` to rely on the server's.
    pub check_alive_interval: Option<Duration>,
}

impl ClientOptions {
    /// Creates default options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reconnect: ReconnectOptions::new(),
            check_alive_interval: None,
        }
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Enables client side keep-alive pings.
    #[inline]
    #[must_use]
    pub const fn with_check_alive_interval(mut self, interval: Duration) -> Self {
        self.check_alive_interval = Some(interval);
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid policy or a zero interval.
    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        if self.check_alive_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config("Keep-alive interval must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
