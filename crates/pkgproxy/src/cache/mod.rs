//! # Cache System
//!
//! Filesystem-backed cache of upstream payloads. Committed entries are plain
//! files under the cache root; entries being written live in a staging
//! directory and are tracked by a [`WriteBarrier`] until they are committed
//! or aborted.

// Module declarations
mod barrier;
mod error;
mod key;
mod range;
mod store;

// Re-export primary types from our various modules
pub use barrier::{MemoryBarrier, WriteBarrier};
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, STAGING_DIR};
pub use range::{RangeSpec, ServedRange};
pub use store::{CacheStore, CacheWriter, CachedFile, RangeRead, WriteOutcome};
