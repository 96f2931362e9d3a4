//! Application orchestrator: wires the engine to the RPC server.

use std::sync::Arc;

use mhserver_data_server::{DataServer, ServerConfig};
use mhserver_protocol::constants::{RPC_CALL_TIMEOUT, WS_MAX_MESSAGE_SIZE};
use mhserver_transfer::{Engine, SystemMemory};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handler::DataHandler;

/// Room left in a frame for the envelope around a base64 chunk.
const ENVELOPE_OVERHEAD: usize = 4096;

/// Runs the service until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Engine --
    let engine = Engine::start(config.engine_config(), SystemMemory, cancel.clone());
    let service = engine.service();
    for user in &config.provision_users {
        service.workspace().provision_user(user)?;
    }

    // -- WS server --
    let server_config = ServerConfig {
        listen_addr: config.listen_ip()?,
        port: config.port,
        max_message_size: max_message_size(config.memory.max_chunk_size),
        call_timeout: RPC_CALL_TIMEOUT,
    };
    let server = DataServer::new(server_config, DataHandler::new(service), cancel.clone());
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tracing::info!("mhserver ready");

    // -- Main loop: wait for shutdown --
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut server_task => {
            // The server only returns early on a bind failure.
            cancel.cancel();
            engine.shutdown().await;
            result??;
            return Ok(());
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping services...");
    cancel.cancel();
    server_task.await??;
    engine.shutdown().await;
    Ok(())
}

/// Frame limit large enough for a base64-encoded chunk of `max_chunk_size`.
fn max_message_size(max_chunk_size: u64) -> usize {
    let chunk = usize::try_from(max_chunk_size).unwrap_or(usize::MAX);
    let encoded = chunk.div_ceil(3).saturating_mul(4);
    encoded
        .saturating_add(ENVELOPE_OVERHEAD)
        .max(WS_MAX_MESSAGE_SIZE)
}
