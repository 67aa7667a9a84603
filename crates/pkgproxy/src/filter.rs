//! # Filters
//!
//! An ordered set of regular expressions matched against the request URI.
//! A match exempts the request from caching: it is always fetched from the
//! origin and never written to the cache.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Failed to open filters file {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("Failed to read filters: {0}")]
    Read(#[from] io::Error),
}

/// Regex filters with wholesale replacement on reload
#[derive(Debug, Default)]
pub struct FilterSet {
    patterns: RwLock<Arc<Vec<Regex>>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active set with the patterns in the file at `path`.
    ///
    /// If the file cannot be opened the current set stays in place.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize, FilterError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FilterError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let count = self.load_from_reader(BufReader::new(file))?;
        info!(count, path = %path.display(), "Parsed filters");
        Ok(count)
    }

    /// Replace the active set with one pattern per line of `reader`.
    ///
    /// Blank lines are ignored. Lines that fail to compile are logged and
    /// skipped. Returns the number of compiled patterns.
    pub fn load_from_reader(&self, reader: impl BufRead) -> Result<usize, FilterError> {
        let mut patterns = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match Regex::new(line) {
                Ok(re) => patterns.push(re),
                Err(e) => warn!(line = idx + 1, pattern = line, error = %e, "Skipping invalid filter"),
            }
        }

        let count = patterns.len();
        *self.patterns.write() = Arc::new(patterns);
        Ok(count)
    }

    /// Whether any pattern matches `uri`
    pub fn matches(&self, uri: &str) -> bool {
        let patterns = self.patterns.read().clone();
        patterns.iter().any(|re| re.is_match(uri))
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}
