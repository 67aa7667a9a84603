//! # Statistics
//!
//! Process-wide byte counters, exported as JSON with the keys
//! `statsCacheBytes` and `statsDownBytes`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Byte counters shared by all requests
#[derive(Debug, Default)]
pub struct Stats {
    cache_bytes: AtomicU64,
    upstream_bytes: AtomicU64,
    requests: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "statsCacheBytes")]
    pub cache_bytes: u64,
    #[serde(rename = "statsDownBytes")]
    pub upstream_bytes: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count bytes served from cached files
    pub fn add_cache_bytes(&self, n: u64) {
        self.cache_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes relayed from the upstream
    pub fn add_upstream_bytes(&self, n: u64) {
        self.upstream_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Next request id, in 1..=999. Ids wrap and are only meant for log
    /// correlation.
    pub fn next_request_id(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) % 999 + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_bytes: self.cache_bytes.load(Ordering::Relaxed),
            upstream_bytes: self.upstream_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.add_cache_bytes(10);
        stats.add_cache_bytes(5);
        stats.add_upstream_bytes(7);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                cache_bytes: 15,
                upstream_bytes: 7
            }
        );
        assert_eq!(stats.to_json(), r#"{"statsCacheBytes":15,"statsDownBytes":7}"#);
    }

    #[test]
    fn test_request_ids_wrap() {
        let stats = Stats::new();
        assert_eq!(stats.next_request_id(), 1);
        for _ in 0..997 {
            stats.next_request_id();
        }
        assert_eq!(stats.next_request_id(), 999);
        assert_eq!(stats.next_request_id(), 1);
    }
}
