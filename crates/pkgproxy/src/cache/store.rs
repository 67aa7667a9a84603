//! # File Store
//!
//! Maps cache keys to files under the cache root.
//!
//! Writes are staged: the payload is written to a uniquely named file in the
//! staging directory and renamed into place on commit, so a file present at
//! a final path is always complete, even across a process restart. The
//! write barrier claim is taken when a write begins and released exactly
//! once, on commit, abort or drop of the writer.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tracing::{debug, warn};
use uuid::Uuid;

use super::barrier::WriteBarrier;
use super::error::{CacheError, CacheResult};
use super::key::{CacheKey, STAGING_DIR};
use super::range::RangeSpec;

/// Filesystem-backed cache store
pub struct CacheStore {
    root: PathBuf,
    staging: PathBuf,
    barrier: Arc<dyn WriteBarrier>,
}

/// Outcome of [`CacheStore::begin_write`]
#[derive(Debug)]
pub enum WriteOutcome {
    /// The caller owns the write and must commit or abort it
    Started(CacheWriter),
    /// Another request is already writing this key
    InProgress,
}

impl CacheStore {
    /// Open a store rooted at `root`, creating the root and staging
    /// directories if needed.
    pub async fn open(root: impl Into<PathBuf>, barrier: Arc<dyn WriteBarrier>) -> CacheResult<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;

        Ok(Self {
            root,
            staging,
            barrier,
        })
    }

    pub fn is_claimed(&self, key: &CacheKey) -> bool {
        self.barrier.is_claimed(key.as_str())
    }

    /// Whether a committed entry exists for `key`. Does not consult the
    /// barrier.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(key.to_path(&self.root))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Open the committed entry for `key`
    pub async fn open_for_read(&self, key: &CacheKey) -> CacheResult<CachedFile> {
        let path = key.to_path(&self.root);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(CacheError::NotFound(key.to_string()));
        }

        Ok(CachedFile {
            file,
            size: meta.len(),
            path,
        })
    }

    /// Start writing the entry for `key`.
    ///
    /// The barrier claim is taken atomically; if another writer holds it,
    /// [`WriteOutcome::InProgress`] is returned and nothing is touched on
    /// disk. On I/O failure the claim is rolled back before returning.
    pub async fn begin_write(&self, key: &CacheKey) -> CacheResult<WriteOutcome> {
        if !self.barrier.try_claim(key.as_str()) {
            return Ok(WriteOutcome::InProgress);
        }

        match self.prepare(key).await {
            Ok(writer) => Ok(WriteOutcome::Started(writer)),
            Err(e) => {
                self.barrier.release(key.as_str());
                Err(e)
            }
        }
    }

    async fn prepare(&self, key: &CacheKey) -> CacheResult<CacheWriter> {
        let final_path = key.to_path(&self.root);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging_path = self
            .staging
            .join(format!("{}.partial", Uuid::new_v4().simple()));
        let file = File::create(&staging_path).await?;

        debug!(key = %key, staging = ?staging_path, "Started cache write");

        Ok(CacheWriter {
            key: key.clone(),
            file: Some(file),
            staging_path,
            final_path,
            barrier: self.barrier.clone(),
            written: 0,
            finished: false,
        })
    }

    /// Remove leftover staging files, e.g. from a crash mid-download.
    /// Returns the number of files removed.
    pub async fn sweep_staging(&self) -> CacheResult<usize> {
        let mut entries = fs::read_dir(&self.staging).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove stale staging file"),
            }
        }

        if removed > 0 {
            debug!(count = removed, "Swept stale staging files");
        }
        Ok(removed)
    }
}

/// An open, committed cache entry
#[derive(Debug)]
pub struct CachedFile {
    file: File,
    size: u64,
    path: PathBuf,
}

/// A positioned reader over the requested part of a cached entry
#[derive(Debug)]
pub struct RangeRead {
    pub reader: Take<File>,
    /// Number of bytes the reader yields
    pub length: u64,
    /// `Content-Range` value when a range was requested
    pub content_range: Option<String>,
}

impl RangeRead {
    pub fn is_partial(&self) -> bool {
        self.content_range.is_some()
    }
}

impl CachedFile {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare to read the whole entry, or the window selected by `range`.
    pub async fn read_range(mut self, range: Option<&RangeSpec>) -> CacheResult<RangeRead> {
        let Some(spec) = range else {
            return Ok(RangeRead {
                reader: self.file.take(self.size),
                length: self.size,
                content_range: None,
            });
        };

        let served = spec.resolve(self.size)?;
        if served.from > 0 {
            self.file.seek(SeekFrom::Start(served.from)).await?;
        }

        Ok(RangeRead {
            reader: self.file.take(served.len()),
            length: served.len(),
            content_range: Some(served.content_range(self.size)),
        })
    }
}

/// Handle to an in-progress cache write.
///
/// Exactly one of [`commit`](Self::commit) or [`abort`](Self::abort) ends the
/// write; dropping the handle without either aborts it.
#[derive(Debug)]
pub struct CacheWriter {
    key: CacheKey,
    file: Option<File>,
    staging_path: PathBuf,
    final_path: PathBuf,
    barrier: Arc<dyn WriteBarrier>,
    written: u64,
    finished: bool,
}

impl CacheWriter {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CacheError::Io(io::Error::other("cache writer already closed")))?;
        file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Move the staged payload into place and release the claim.
    /// Returns the number of bytes committed.
    pub async fn commit(mut self) -> CacheResult<u64> {
        let result = self.publish().await;
        if result.is_err() {
            let _ = fs::remove_file(&self.staging_path).await;
        }
        self.finish();

        match result {
            Ok(()) => {
                debug!(key = %self.key, bytes = self.written, "Committed cache entry");
                Ok(self.written)
            }
            Err(e) => Err(e),
        }
    }

    async fn publish(&mut self) -> CacheResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        fs::rename(&self.staging_path, &self.final_path).await?;
        Ok(())
    }

    /// Discard the staged payload and release the claim.
    pub async fn abort(mut self) {
        // Close before unlinking
        self.file.take();
        if let Err(e) = fs::remove_file(&self.staging_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?self.staging_path, error = %e, "Failed to remove staging file");
            }
        }
        self.finish();
        debug!(key = %self.key, bytes = self.written, "Aborted cache entry");
    }

    fn finish(&mut self) {
        self.finished = true;
        self.barrier.release(self.key.as_str());
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        let _ = std::fs::remove_file(&self.staging_path);
        self.barrier.release(self.key.as_str());
        debug!(key = %self.key, "Dropped unfinished cache write");
    }
}
