use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::FileHandleCache;
use crate::memory::MemoryProbe;
use crate::registry::ConnectionRegistry;
use crate::service::TransferService;
use crate::EngineConfig;

/// A running transfer engine: the service plus its two background sweepers.
///
/// Dropping the engine without calling [`Engine::shutdown`] leaves the
/// sweepers running until `shutdown` (the token passed to `start`) fires.
pub struct Engine {
    service: Arc<TransferService>,
    cancel: CancellationToken,
    sweepers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds the registry, cache and service and starts the sweepers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        probe: impl MemoryProbe,
        shutdown: CancellationToken,
    ) -> Self {
        let lifetimes = config.lifetimes;
        let registry = Arc::new(ConnectionRegistry::new(lifetimes.transfer_ttl));
        let cache = Arc::new(FileHandleCache::new(lifetimes.cache_ttl));

        let cancel = shutdown.child_token();
        let sweepers = vec![
            registry.spawn_sweeper(lifetimes.transfer_sweep_period, cancel.child_token()),
            cache.spawn_sweeper(lifetimes.cache_sweep_period, cancel.child_token()),
        ];

        let service = Arc::new(TransferService::new(
            &config,
            Arc::new(probe),
            registry,
            cache,
        ));

        tracing::info!(
            workspace = %config.workspace_path.display(),
            max_save_requests = config.max_save_requests,
            min_chunk_size = config.memory.min_chunk_size,
            max_chunk_size = config.memory.max_chunk_size,
            "transfer engine started"
        );

        Self {
            service,
            cancel,
            sweepers,
        }
    }

    /// Shared handle to the transfer service.
    pub fn service(&self) -> Arc<TransferService> {
        Arc::clone(&self.service)
    }

    /// Stops both sweepers and waits for them. Cached descriptors are
    /// closed on the way out.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for sweeper in self.sweepers {
            if let Err(e) = sweeper.await {
                tracing::warn!("sweeper task failed: {e}");
            }
        }
        tracing::info!("transfer engine stopped");
    }
}
