use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No committed entry for the key. Normal control flow on a miss.
    #[error("Cache entry not found: {0}")]
    NotFound(String),

    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;
