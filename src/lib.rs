// src/lib.rs
// Module declarations
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod probe;
pub mod process;
pub mod server;
pub mod state;
pub mod transport;

pub use config::ServerConfig;
pub use state::AppState;

use anyhow::Context;
use process::KillReason;
use std::future::Future;
use std::net::SocketAddr;

/// Serve the probe API until Ctrl-C.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr;
    let state = AppState::new(config);

    log::info!(
        "Probe programs: ping={} traceroute={} scan={}",
        state.config.ping_program,
        state.config.traceroute_program,
        state.config.scan_program
    );

    let sweeper = match state.config.max_probe_lifetime() {
        Some(max_age) => {
            log::info!(
                "Lifetime sweep every {:?}, max probe lifetime {:?}",
                state.config.sweep_interval(),
                max_age
            );
            Some(state.registry.start_sweeper(state.config.sweep_interval(), max_age))
        }
        None => {
            log::warn!("Probe lifetime sweep disabled; ping and scan run until cancelled");
            None
        }
    };

    let (bound, server) = bind(state, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Shutdown signal received");
    })?;

    log::info!("netprobe listening on http://{}", bound);
    server.await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}

/// Bind the routes to `addr`. Once `shutdown` resolves every registered
/// process is terminated, so open response streams end and graceful
/// shutdown can finish instead of waiting on continuous pings.
///
/// Must be called from inside a Tokio runtime.
pub fn bind<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> anyhow::Result<(SocketAddr, impl Future<Output = ()>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let signal = async move {
        shutdown.await;
        let stopped = registry.kill_all(KillReason::Shutdown);
        if !stopped.is_empty() {
            log::info!("Stopping {} active probe(s) on shutdown", stopped.len());
        }
    };

    warp::serve(server::routes(state))
        .try_bind_with_graceful_shutdown(addr, signal)
        .with_context(|| format!("failed to bind {}", addr))
}
