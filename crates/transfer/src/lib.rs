//! Chunked data transfer engine for the mhserver file store.
//!
//! A client calls `CreateConnection` once to obtain a handle and a chunk
//! plan, then moves the file chunk by chunk with `GetData` / `SaveData`,
//! verifying chunks with `GetSum`.
//!
//! Components:
//! - [`memory`]: free-memory probe feeding the planner.
//! - [`registry`]: live transfers keyed by handle, sliding TTL.
//! - [`cache`]: open file descriptors reused across chunk calls.
//! - [`planner`]: chunk size/count selection.
//! - [`service`]: the RPC-facing orchestrator.

pub mod cache;
mod engine;
mod error;
pub mod memory;
pub mod planner;
pub mod registry;
pub mod service;
mod validation;
mod workspace;

use std::path::PathBuf;
use std::time::Duration;

pub use cache::FileHandleCache;
pub use engine::Engine;
pub use error::{ErrorKind, TransferError};
pub use memory::{FixedMemory, MemoryProbe, SystemMemory};
pub use planner::{ChunkPlan, plan_chunks};
pub use registry::{Advance, ConnectionRegistry, Handle, Transfer};
pub use service::{Connection, DataPart, ServiceStats, TransferRequest, TransferService};
pub use validation::validate_path_segment;
pub use workspace::{Category, Workspace, staging_path};

/// Unit the size-based chunk formula scales from: 32 KiB.
pub const BASE_CHUNK_SIZE: u64 = 32 * 1024;

/// Memory page size chunk sizes are aligned to.
pub const PAGE_SIZE: u64 = 4096;

/// Default cap on concurrent `SaveData` executions.
pub const DEFAULT_MAX_SAVE_REQUESTS: usize = 125;

/// Suffix of the file an in-progress upload is written to.
pub const STAGING_SUFFIX: &str = ".part";

/// How long a transfer survives without activity.
pub const TRANSFER_TTL: Duration = Duration::from_secs(5 * 60);

/// How often expired transfers are swept.
pub const TRANSFER_SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// How long an idle file descriptor stays cached.
pub const CACHE_TTL: Duration = Duration::from_secs(15);

/// How often idle file descriptors are evicted.
pub const CACHE_SWEEP_PERIOD: Duration = Duration::from_secs(3);

/// Memory bounds for chunk planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Total memory the service may use for chunk buffers.
    pub available_ram: u64,
    pub max_chunk_size: u64,
    pub min_chunk_size: u64,
}

/// Liveness windows and sweep periods of the registry and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetimes {
    pub transfer_ttl: Duration,
    pub transfer_sweep_period: Duration,
    pub cache_ttl: Duration,
    pub cache_sweep_period: Duration,
}

impl Default for Lifetimes {
    fn default() -> Self {
        Self {
            transfer_ttl: TRANSFER_TTL,
            transfer_sweep_period: TRANSFER_SWEEP_PERIOD,
            cache_ttl: CACHE_TTL,
            cache_sweep_period: CACHE_SWEEP_PERIOD,
        }
    }
}

/// Immutable engine configuration, built once by the bootstrap.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of every user's files.
    pub workspace_path: PathBuf,
    pub memory: MemoryConfig,
    /// Capacity of the `SaveData` backpressure semaphore.
    pub max_save_requests: usize,
    pub lifetimes: Lifetimes,
}
