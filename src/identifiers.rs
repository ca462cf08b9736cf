//! Type-safe identifiers.
//!
//! Newtype wrappers keep channel ids and connection ids from being mixed
//! up at compile time.
//!
//! | Type | Scope | Allocation |
//! |------|-------|------------|
//! | [`ChannelId`] | one transport | [`ChannelIdAllocator`], monotonic |
//! | [`ConnectionId`] | one server process | random UUID v4 |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// First id handed out for client-initiated channels.
pub const CLIENT_CHANNEL_ID_SEED: u64 = 200;

/// First id handed out for server-initiated channels.
///
/// Keeps server-initiated ids out of the client range on the same transport.
pub const SERVER_CHANNEL_ID_SEED: u64 = 1 << 32;

// ============================================================================
// ChannelId
// ============================================================================

/// Identifier of a channel, unique within one transport's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Wraps a raw channel id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// ChannelIdAllocator
// ============================================================================

/// Monotonic channel id source scoped to a single transport.
///
/// Ids are never reused by the same allocator, which is what keeps two
/// live channels on one transport from sharing an id.
#[derive(Debug)]
pub struct ChannelIdAllocator {
    next: AtomicU64,
}

impl ChannelIdAllocator {
    /// Creates an allocator that starts at `seed`.
    #[inline]
    #[must_use]
    pub const fn starting_at(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    /// Allocator for channels opened by the client side.
    #[inline]
    #[must_use]
    pub const fn client() -> Self {
        Self::starting_at(CLIENT_CHANNEL_ID_SEED)
    }

    /// Allocator for channels opened by the server side.
    #[inline]
    #[must_use]
    pub const fn server() -> Self {
        Self::starting_at(SERVER_CHANNEL_ID_SEED)
    }

    /// Returns the next id.
    #[inline]
    pub fn allocate(&self) -> ChannelId {
        ChannelId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifier of one accepted server-side transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random connection id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashSet;

    #[test]
    fn test_client_allocator_starts_at_seed() {
        let allocator = ChannelIdAllocator::client();
        assert_eq!(allocator.allocate(), ChannelId::new(200));
        assert_eq!(allocator.allocate(), ChannelId::new(201));
    }

    #[test]
    fn test_server_and_client_ranges_are_disjoint() {
        let client = ChannelIdAllocator::client();
        let server = ChannelIdAllocator::server();
        let client_ids: FxHashSet<_> = (0..1000).map(|_| client.allocate()).collect();
        assert!((0..1000).all(|_| !client_ids.contains(&server.allocate())));
    }

    #[test]
    fn test_allocator_never_repeats_across_threads() {
        let allocator = std::sync::Arc::new(ChannelIdAllocator::client());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = std::sync::Arc::clone(&allocator);
                std::thread::spawn(move || (0..250).map(|_| allocator.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = FxHashSet::default();
        for handle in handles {
            for id in handle.join().expect("thread") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_channel_id_serializes_as_number() {
        let json = serde_json::to_string(&ChannelId::new(42)).expect("serialize");
        assert_eq!(json, "42");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }
}
