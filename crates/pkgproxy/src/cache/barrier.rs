//! # Write Barrier
//!
//! Registry of cache keys whose entry is currently being written. A claimed
//! key must not be served from the cache.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;

/// A registry of in-progress cache writes.
///
/// Implementations must be safe under any number of concurrent callers and
/// must never hold a lock across I/O.
pub trait WriteBarrier: Send + Sync + fmt::Debug {
    /// Record that `key` is being written. Claiming a claimed key is a no-op.
    fn claim(&self, key: &str);

    /// Claim `key` only if nobody holds it, as a single critical section.
    /// Returns `false` when the key was already claimed.
    fn try_claim(&self, key: &str) -> bool;

    /// Drop the claim on `key`. Releasing an unclaimed key is a no-op.
    fn release(&self, key: &str);

    /// Whether `key` is currently claimed
    fn is_claimed(&self, key: &str) -> bool;
}

/// In-process write barrier
#[derive(Debug, Default)]
pub struct MemoryBarrier {
    claims: RwLock<HashSet<String>>,
}

impl MemoryBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding claims
    pub fn len(&self) -> usize {
        self.claims.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.read().is_empty()
    }
}

impl WriteBarrier for MemoryBarrier {
    fn claim(&self, key: &str) {
        self.claims.write().insert(key.to_owned());
    }

    fn try_claim(&self, key: &str) -> bool {
        let mut claims = self.claims.write();
        if claims.contains(key) {
            return false;
        }
        claims.insert(key.to_owned())
    }

    fn release(&self, key: &str) {
        self.claims.write().remove(key);
    }

    fn is_claimed(&self, key: &str) -> bool {
        self.claims.read().contains(key)
    }
}
