//! # Relay
//!
//! Copies an upstream body to the client and, when the response is being
//! cached, to a [`CacheWriter`] at the same time. Every exit path ends the
//! cache write exactly once: commit after a complete copy, abort otherwise.
//! A failing cache write never interrupts the client.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::stats::Stats;
use crate::upstream::BodyStream;

/// What happened to a relayed body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Bytes pulled from the upstream
    pub bytes: u64,
    /// Whether the body was committed to the cache
    pub cached: bool,
    /// Whether the whole body reached the client
    pub complete: bool,
}

/// Pump `body` into `tx`, teeing into `writer` if present.
pub async fn relay(
    mut body: BodyStream,
    mut writer: Option<CacheWriter>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    stats: Arc<Stats>,
) -> RelayOutcome {
    let mut bytes = 0u64;
    let mut cached = false;
    let mut complete = false;

    loop {
        let next = tokio::select! {
            next = body.next() => next,
            _ = tx.closed() => {
                debug!("Client went away, stopping relay");
                abort(&mut writer).await;
                break;
            }
        };

        match next {
            Some(Ok(chunk)) => {
                bytes += chunk.len() as u64;

                let failed = match writer.as_mut() {
                    Some(w) => w.write(&chunk).await.err(),
                    None => None,
                };
                if let Some(e) = failed {
                    warn!(error = %e, "Cache write failed, continuing uncached");
                    abort(&mut writer).await;
                }

                if tx.send(Ok(chunk)).await.is_err() {
                    debug!("Client went away, stopping relay");
                    abort(&mut writer).await;
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Upstream body failed");
                abort(&mut writer).await;
                // Terminate the client body instead of ending it cleanly
                let _ = tx.send(Err(e)).await;
                break;
            }
            None => {
                complete = true;
                if let Some(w) = writer.take() {
                    let key = w.key().clone();
                    match w.commit().await {
                        Ok(n) => {
                            info!(key = %key, bytes = n, "Saved to cache");
                            cached = true;
                        }
                        Err(e) => warn!(key = %key, error = %e, "Failed to commit cache entry"),
                    }
                }
                break;
            }
        }
    }

    stats.add_upstream_bytes(bytes);
    RelayOutcome {
        bytes,
        cached,
        complete,
    }
}

async fn abort(writer: &mut Option<CacheWriter>) {
    if let Some(w) = writer.take() {
        w.abort().await;
    }
}
