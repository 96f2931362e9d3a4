//! mhserver data service entry point.

mod app;
mod config;
mod handler;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting mhserver");

    let config = config::Config::load()?;
    tracing::info!(
        workspace = %config.workspace_path,
        port = config.port,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("mhserver shut down cleanly");
    Ok(())
}
