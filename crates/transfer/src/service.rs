//! Transfer Service: the RPC-facing orchestrator.
//!
//! Ties the [`ConnectionRegistry`], [`FileHandleCache`] and chunk planner
//! together. Reads go straight to the file; writes pass through a bounded
//! semaphore and land in a staging file that is renamed into place when the
//! last chunk arrives.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::cache::FileHandleCache;
use crate::memory::MemoryProbe;
use crate::planner::plan_chunks;
use crate::registry::{Advance, ConnectionRegistry, Handle, Transfer};
use crate::workspace::{Category, Workspace, staging_path};
use crate::{EngineConfig, MemoryConfig, TransferError};

/// Caller-supplied description of a transfer. Not persisted.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Authenticated user, injected by the gateway. Trusted as given.
    pub username: String,
    pub filename: String,
    /// Wire name of the category (`file`, `image`, `music`).
    pub category: String,
    /// Declared total size in bytes.
    pub size: u64,
}

/// Result of `CreateConnection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub handle: Handle,
    pub chunk_size: u64,
    pub chunk_count: u64,
}

/// Result of `GetData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPart {
    pub chunk: Vec<u8>,
    /// Byte offset of `chunk` within the file.
    pub offset: u64,
}

/// Point-in-time counters of the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub active_transfers: usize,
    pub cached_files: usize,
    pub writes_in_flight: usize,
    /// Highest number of simultaneous chunk writes seen so far.
    pub peak_writes: usize,
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// Counts `SaveData` calls currently holding a write slot.
#[derive(Default)]
struct WriteGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl WriteGauge {
    fn enter(&self) -> WriteGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        WriteGuard(self)
    }
}

struct WriteGuard<'a>(&'a WriteGauge);

/// A held write slot. The gauge is released before the permit so the
/// in-flight count never exceeds the slot count.
struct WriteSlot<'a> {
    _gauge: WriteGuard<'a>,
    _permit: SemaphorePermit<'a>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves `CreateConnection`, `GetData`, `SaveData` and `GetSum`.
pub struct TransferService {
    workspace: Workspace,
    memory: MemoryConfig,
    probe: Arc<dyn MemoryProbe>,
    registry: Arc<ConnectionRegistry>,
    cache: Arc<FileHandleCache>,
    save_slots: Semaphore,
    writes: WriteGauge,
}

impl TransferService {
    /// Creates a service over an existing registry and cache.
    ///
    /// The service does not own the sweepers; see [`crate::Engine`].
    pub fn new(
        config: &EngineConfig,
        probe: Arc<dyn MemoryProbe>,
        registry: Arc<ConnectionRegistry>,
        cache: Arc<FileHandleCache>,
    ) -> Self {
        Self {
            workspace: Workspace::new(config.workspace_path.clone()),
            memory: config.memory,
            probe,
            registry,
            cache,
            save_slots: Semaphore::new(config.max_save_requests.max(1)),
            writes: WriteGauge::default(),
        }
    }

    /// The workspace files are stored under.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Registers a transfer and returns its handle and chunk plan.
    ///
    /// Does not touch the filesystem.
    pub fn create_connection(&self, req: &TransferRequest) -> Result<Connection, TransferError> {
        if req.filename.is_empty() {
            return Err(TransferError::EmptyFilename);
        }
        let category: Category = req.category.parse()?;
        let path = self
            .workspace
            .file_path(&req.username, category, &req.filename)?;
        if req.size == 0 {
            return Err(TransferError::InvalidSize(req.size));
        }

        let plan = plan_chunks(
            &self.memory,
            self.probe.available_memory(),
            self.registry.active_count(),
            req.size,
        );
        let handle = self.registry.add(&path, req.size, plan);

        tracing::info!(
            %handle,
            path = %path.display(),
            size = req.size,
            chunk_size = plan.chunk_size,
            chunk_count = plan.chunk_count,
            "connection created"
        );

        Ok(Connection {
            handle,
            chunk_size: plan.chunk_size,
            chunk_count: plan.chunk_count,
        })
    }

    /// Reads chunk `chunk_id` of the transfer's file.
    ///
    /// The last chunk may be short. A chunk starting at or past the end of
    /// the file yields [`TransferError::EndOfData`].
    pub async fn get_data(&self, handle: &str, chunk_id: u64) -> Result<DataPart, TransferError> {
        let transfer = self.lookup(handle)?;
        let (chunk, offset) = self.read_chunk(&transfer, chunk_id, "get_data").await?;
        Ok(DataPart { chunk, offset })
    }

    /// Returns the SHA-256 digest of chunk `chunk_id` of the transfer's file.
    pub async fn get_sum(&self, handle: &str, chunk_id: u64) -> Result<[u8; 32], TransferError> {
        let transfer = self.lookup(handle)?;
        let (chunk, offset) = self.read_chunk(&transfer, chunk_id, "get_sum").await?;

        let sum: [u8; 32] = Sha256::digest(&chunk).into();
        tracing::debug!(
            %handle,
            chunk_id,
            offset,
            sum = %hex::encode(sum),
            "chunk digest computed"
        );
        Ok(sum)
    }

    /// Writes `chunk` at `offset` of the transfer's staging file.
    ///
    /// Waits for a free write slot first. When this is the transfer's last
    /// chunk, the staging file is renamed to its final name.
    pub async fn save_data(
        &self,
        handle: &str,
        chunk: Vec<u8>,
        offset: u64,
    ) -> Result<(), TransferError> {
        let _slot = self.write_slot().await?;

        let id = parse_handle(handle)?;
        let transfer = self
            .registry
            .get(&id)
            .ok_or(TransferError::UnexpectedFileChange)?;

        if chunk.len() as u64 > transfer.chunk_size {
            return Err(TransferError::ChunkTooLarge {
                len: chunk.len(),
                max: transfer.chunk_size,
            });
        }

        let staging = staging_path(&transfer.path);
        let file = self.open_cached(&staging, Access::Write, "save_data")?;
        let writer = Arc::clone(&file);
        tokio::task::spawn_blocking(move || write_all_at(&writer, &chunk, offset))
            .await
            .map_err(|e| TransferError::internal("save_data", io::Error::other(e)))?
            .map_err(|e| TransferError::internal("save_data", e))?;

        match self.registry.advance_chunk(&id) {
            Advance::Continuing => Ok(()),
            Advance::Completed(done) => self.finalize(&done, &file).await,
            Advance::NotFound => Err(TransferError::UnexpectedFileChange),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            active_transfers: self.registry.len(),
            cached_files: self.cache.len(),
            writes_in_flight: self.writes.in_flight.load(Ordering::SeqCst),
            peak_writes: self.writes.peak.load(Ordering::SeqCst),
        }
    }

    /// Waits for one of the `max_save_requests` write slots.
    async fn write_slot(&self) -> Result<WriteSlot<'_>, TransferError> {
        let permit = self
            .save_slots
            .acquire()
            .await
            .map_err(|e| TransferError::internal("save_data", io::Error::other(e)))?;
        Ok(WriteSlot {
            _gauge: self.writes.enter(),
            _permit: permit,
        })
    }

    fn lookup(&self, handle: &str) -> Result<Transfer, TransferError> {
        let id = parse_handle(handle)?;
        self.registry
            .get(&id)
            .ok_or(TransferError::UnexpectedFileChange)
    }

    async fn read_chunk(
        &self,
        transfer: &Transfer,
        chunk_id: u64,
        op: &'static str,
    ) -> Result<(Vec<u8>, u64), TransferError> {
        let offset = transfer
            .chunk_size
            .checked_mul(chunk_id)
            .ok_or(TransferError::EndOfData)?;
        let file = self.open_cached(&transfer.path, Access::Read, op)?;
        let len = transfer.chunk_size as usize;

        let (mut buf, n) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            read_full_at(&file, &mut buf, offset).map(|n| (buf, n))
        })
        .await
        .map_err(|e| TransferError::internal(op, io::Error::other(e)))?
        .map_err(|e| TransferError::internal(op, e))?;

        if n == 0 {
            return Err(TransferError::EndOfData);
        }
        buf.truncate(n);
        Ok((buf, offset))
    }

    /// Trims the staging file to the declared size and renames it into place.
    async fn finalize(&self, done: &Transfer, file: &Arc<File>) -> Result<(), TransferError> {
        let staging = staging_path(&done.path);
        self.cache.invalidate(&staging);

        let file = Arc::clone(file);
        let size = done.file_size;
        let from = staging.clone();
        let to = done.path.clone();
        tokio::task::spawn_blocking(move || promote_staging(file, size, &from, &to))
            .await
            .map_err(|e| TransferError::internal("save_data", io::Error::other(e)))??;

        self.cache.invalidate(&done.path);
        tracing::info!(
            path = %done.path.display(),
            size = done.file_size,
            chunks = done.chunk_count,
            "upload complete"
        );
        Ok(())
    }

    /// Returns the cached descriptor for `path`, opening and caching it on
    /// a miss.
    fn open_cached(
        &self,
        path: &Path,
        access: Access,
        op: &'static str,
    ) -> Result<Arc<File>, TransferError> {
        if let Some(file) = self.cache.get(path) {
            return Ok(file);
        }

        let mut options = OpenOptions::new();
        match access {
            Access::Read => options.read(true),
            Access::Write => options.write(true).create(true).truncate(false),
        };
        let file = Arc::new(
            options
                .open(path)
                .map_err(|e| TransferError::from_open(op, e))?,
        );
        self.cache.put(path, Arc::clone(&file));
        Ok(file)
    }
}

/// Trims the staging file to `size` and renames it to `to`.
///
/// Only a failed rename is reported as [`TransferError::FileNotExist`].
fn promote_staging(
    file: Arc<File>,
    size: u64,
    from: &Path,
    to: &Path,
) -> Result<(), TransferError> {
    file.set_len(size)
        .map_err(|e| TransferError::internal("save_data", e))?;
    drop(file);
    std::fs::rename(from, to).map_err(|e| {
        tracing::warn!(path = %to.display(), "failed to rename upload: {e}");
        TransferError::FileNotExist
    })
}

fn parse_handle(handle: &str) -> Result<Handle, TransferError> {
    Handle::parse_str(handle).map_err(|_| TransferError::BadHandle)
}

/// Fills `buf` from `offset` until it is full or the file ends.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match std::os::windows::fs::FileExt::seek_write(file, buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
