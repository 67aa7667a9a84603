//! # Cache Keys
//!
//! A cache key is the normalized, origin-relative request path. The same
//! string names the entry in the write barrier and, joined to the cache root,
//! the file holding the committed payload.

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{CacheError, CacheResult};

/// Directory under the cache root holding in-progress writes. Request paths
/// starting with this segment are never cacheable.
pub const STAGING_DIR: &str = ".pkgproxy-staging";

/// Normalized request path identifying a cached resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    normalized: String,
}

impl CacheKey {
    /// Build a key from a URI path such as `/debian/pool/main/a/apt.deb`.
    ///
    /// Empty and `.` segments are dropped. Traversal (`..`), NUL bytes and
    /// backslashes are rejected so that two different request paths can
    /// never name the same file, and no key escapes the cache root.
    /// Percent-encoded octets are kept as-is.
    pub fn from_path(path: &str) -> CacheResult<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(CacheError::InvalidKey(format!(
                        "path traversal in {path}"
                    )));
                }
                s if s.contains('\0') || s.contains('\\') => {
                    return Err(CacheError::InvalidKey(format!(
                        "forbidden character in {path}"
                    )));
                }
                s => segments.push(s),
            }
        }

        match segments.first() {
            None => Err(CacheError::InvalidKey(format!(
                "{path} does not name a file"
            ))),
            Some(&first) if first == STAGING_DIR => Err(CacheError::InvalidKey(format!(
                "{path} is inside the staging area"
            ))),
            Some(_) => Ok(Self {
                normalized: segments.join("/"),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Location of the committed entry under `root`
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.normalized.split('/'));
        path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}
