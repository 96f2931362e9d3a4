//! File Handle Cache: open descriptors reused across chunk calls.
//!
//! Each path maps to at most one cached descriptor. Idle descriptors are
//! evicted (and closed) by a background sweeper under the exclusive lock.
//! Callers hold an `Arc<File>`, so a descriptor evicted while an I/O call
//! is still using it is closed when that call drops its reference.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct CachedFile {
    file: Arc<File>,
    expires_at: Mutex<Instant>,
}

/// Maps absolute paths to open file descriptors with a short idle window.
pub struct FileHandleCache {
    files: RwLock<HashMap<PathBuf, CachedFile>>,
    ttl: Duration,
}

impl FileHandleCache {
    /// Creates an empty cache whose descriptors are evicted after `ttl`
    /// without access.
    pub fn new(ttl: Duration) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Stores `file` for `path`, replacing any descriptor already cached.
    pub fn put(&self, path: &Path, file: Arc<File>) {
        let cached = CachedFile {
            file,
            expires_at: Mutex::new(Instant::now() + self.ttl),
        };
        self.files.write().insert(path.to_path_buf(), cached);
    }

    /// Returns the cached descriptor for `path` and refreshes its expiration.
    pub fn get(&self, path: &Path) -> Option<Arc<File>> {
        let files = self.files.read();
        let cached = files.get(path)?;
        *cached.expires_at.lock() = Instant::now() + self.ttl;
        Some(Arc::clone(&cached.file))
    }

    /// Drops the cached descriptor for `path`, if any.
    pub fn invalidate(&self, path: &Path) {
        self.files.write().remove(path);
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Evicts every descriptor idle past its window. Returns how many were
    /// evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|_, cached| *cached.expires_at.get_mut() > now);
        before - files.len()
    }

    /// Evicts everything.
    pub fn clear(&self) {
        self.files.write().clear();
    }

    /// Spawns the periodic evictor. It stops when `cancel` fires and closes
    /// every remaining descriptor on the way out.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.sweep_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "idle file handles closed");
                        }
                    }
                }
            }

            cache.clear();
            tracing::debug!("file handle cache sweeper stopped");
        })
    }
}
