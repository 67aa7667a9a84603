//! # Byte Ranges
//!
//! Single-range subset of HTTP partial content for serving cached files.
//!
//! Only `bytes=<start>-<end>` is understood. `bytes=-N` is NOT a suffix range
//! here: it selects the first `N + 1` bytes.

use std::sync::LazyLock;

use regex::Regex;

use super::error::{CacheError, CacheResult};

static RANGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bytes=(\d*)-(\d*)$").unwrap());

/// A parsed `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    /// Inclusive end offset
    pub end: Option<u64>,
}

/// Byte window `[from, to)` of an entry to be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedRange {
    pub from: u64,
    pub to: u64,
}

impl RangeSpec {
    pub fn parse(header: &str) -> CacheResult<Self> {
        let caps = RANGE_REGEX
            .captures(header.trim())
            .ok_or_else(|| CacheError::RangeNotSatisfiable(format!("unsupported range {header}")))?;

        let number = |idx: usize| -> CacheResult<Option<u64>> {
            match caps.get(idx).map(|m| m.as_str()) {
                None | Some("") => Ok(None),
                Some(digits) => digits.parse::<u64>().map(Some).map_err(|e| {
                    CacheError::RangeNotSatisfiable(format!("bad offset in {header}: {e}"))
                }),
            }
        };

        Ok(Self {
            start: number(1)?,
            end: number(2)?,
        })
    }

    /// Resolve against an entry of `size` bytes.
    pub fn resolve(&self, size: u64) -> CacheResult<ServedRange> {
        let mut from = 0;
        let mut to = size;

        if let Some(end) = self.end {
            to = end.saturating_add(1);
            if to > size {
                return Err(CacheError::RangeNotSatisfiable(format!(
                    "end {end} beyond size {size}"
                )));
            }
        }

        if let Some(start) = self.start {
            from = start;
            if from > to {
                return Err(CacheError::RangeNotSatisfiable(format!(
                    "start {start} beyond {to}"
                )));
            }
        }

        if from == to {
            return Err(CacheError::RangeNotSatisfiable(format!(
                "empty range at {from}"
            )));
        }

        Ok(ServedRange { from, to })
    }
}

impl ServedRange {
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }

    /// `Content-Range` header value for an entry of `size` bytes
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.from, self.to - 1, size)
    }
}
