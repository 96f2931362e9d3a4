//! Connection Registry: live transfers keyed by an opaque handle.
//!
//! Entries use a sliding expiration; a background sweeper removes entries
//! whose expiration has elapsed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::planner::ChunkPlan;

/// Opaque transfer handle (random 128-bit identifier).
pub type Handle = Uuid;

/// Snapshot of a registered transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub path: PathBuf,
    /// Declared total file size in bytes.
    pub file_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub loaded_chunks: u64,
}

/// Result of [`ConnectionRegistry::advance_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// More chunks are expected.
    Continuing,
    /// The last chunk arrived; the entry has been removed. Carries the
    /// final snapshot so the caller can finalize the file.
    Completed(Transfer),
    /// No live entry for the handle.
    NotFound,
}

struct Entry {
    transfer: Transfer,
    // Refreshed by lookups that only hold the shared map lock.
    expires_at: Mutex<Instant>,
}

/// Maps transfer handles to their file path, chunk plan and progress.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Handle, Entry>>,
    ttl: Duration,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose entries live `ttl` past their last use.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Registers a new transfer and returns its fresh handle.
    pub fn add(&self, path: &Path, file_size: u64, plan: ChunkPlan) -> Handle {
        let handle = Uuid::new_v4();
        let entry = Entry {
            transfer: Transfer {
                path: path.to_path_buf(),
                file_size,
                chunk_size: plan.chunk_size,
                chunk_count: plan.chunk_count,
                loaded_chunks: 0,
            },
            expires_at: Mutex::new(Instant::now() + self.ttl),
        };
        self.entries.write().insert(handle, entry);
        handle
    }

    /// Returns a snapshot of the transfer and refreshes its expiration.
    pub fn get(&self, handle: &Handle) -> Option<Transfer> {
        let entries = self.entries.read();
        let entry = entries.get(handle)?;
        *entry.expires_at.lock() = Instant::now() + self.ttl;
        Some(entry.transfer.clone())
    }

    /// Counts one more loaded chunk for `handle`.
    ///
    /// The transfer completes when the loaded count reaches the total
    /// (checked after the increment); the entry is removed at that point.
    pub fn advance_chunk(&self, handle: &Handle) -> Advance {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(handle) else {
            return Advance::NotFound;
        };

        entry.transfer.loaded_chunks += 1;
        if entry.transfer.loaded_chunks >= entry.transfer.chunk_count {
            return match entries.remove(handle) {
                Some(done) => Advance::Completed(done.transfer),
                None => Advance::NotFound,
            };
        }

        *entry.expires_at.get_mut() = Instant::now() + self.ttl;
        Advance::Continuing
    }

    /// Number of live transfers, floored at 1.
    pub fn active_count(&self) -> usize {
        self.entries.read().len().max(1)
    }

    /// Number of live transfers (may be 0).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no transfer is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry whose expiration has elapsed. Returns how many
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| *entry.expires_at.get_mut() > now);
        before - entries.len()
    }

    /// Spawns the periodic sweeper. It stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "expired transfers swept");
                        }
                    }
                }
            }
            tracing::debug!("transfer registry sweeper stopped");
        })
    }
}
