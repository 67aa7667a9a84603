//! # pkgproxy
//!
//! A caching transparent HTTP proxy meant to sit in front of package and
//! update mirrors. Payloads fetched from the origin are streamed to the client
//! and persisted to a local filesystem cache at the same time, so repeated
//! downloads are served from disk.
//!
//! ## Features
//!
//! - Write barrier guaranteeing a reader never sees an incomplete entry
//! - Staged writes committed with an atomic rename
//! - Single-range partial content served from cached files
//! - Regex filters to exempt paths from caching, reloadable at runtime
//! - Byte counters for cache and upstream traffic

pub mod builder;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod stats;
pub mod upstream;

pub use builder::UpstreamConfigBuilder;
pub use cache::{CacheError, CacheKey, CacheStore, MemoryBarrier, WriteBarrier};
pub use config::{ServerConfig, UpstreamConfig};
pub use coordinator::Coordinator;
pub use error::ProxyError;
pub use filter::{FilterError, FilterSet};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use server::Server;
pub use stats::{Stats, StatsSnapshot};
pub use upstream::{HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse, create_client};
