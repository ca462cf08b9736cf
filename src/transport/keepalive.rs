//! Transport liveness checks.
//!
//! Every interval the monitor looks at the liveness flag. A flag still
//! cleared from the previous round means the peer never answered the
//! last ping, so the transport is terminated. Otherwise the flag is
//! cleared and a new ping goes out; any pong sets it again.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default interval between liveness checks.
pub const DEFAULT_CHECK_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Liveness
// ============================================================================

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Peer answered since the last check. Send another ping.
    Ping,
    /// Peer stayed silent for a whole interval. Drop the transport.
    Terminate,
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Liveness flag of one transport.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    alive: bool,
    interval: Duration,
}

impl KeepAlive {
    /// Creates a monitor. A fresh transport counts as alive.
    #[inline]
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            alive: true,
            interval,
        }
    }

    /// Returns the check interval.
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the liveness flag.
    #[inline]
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Runs one check, clearing the flag.
    pub fn check(&mut self) -> Liveness {
        if std::mem::replace(&mut self.alive, false) {
            Liveness::Ping
        } else {
            Liveness::Terminate
        }
    }

    /// Records a pong.
    #[inline]
    pub fn acknowledge(&mut self) {
        self.alive = true;
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_ALIVE_INTERVAL)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval() {
        assert_eq!(KeepAlive::default().interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_silent_peer_is_terminated_on_second_check() {
        let mut keepalive = KeepAlive::new(Duration::from_millis(10));
        assert_eq!(keepalive.check(), Liveness::Ping);
        assert!(!keepalive.is_alive());
        assert_eq!(keepalive.check(), Liveness::Terminate);
    }

    #[test]
    fn test_pong_keeps_transport_alive() {
        let mut keepalive = KeepAlive::new(Duration::from_millis(10));
        for _ in 0..5 {
            assert_eq!(keepalive.check(), Liveness::Ping);
            keepalive.acknowledge();
        }
        assert!(keepalive.is_alive());
    }
}
