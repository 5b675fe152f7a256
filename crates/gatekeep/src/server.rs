use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use gatekeep_service::config::Config;
use gatekeep_service::metric;
use gatekeep_service::services::SharedServices;
use tokio_util::sync::CancellationToken;

use crate::endpoints;
use crate::service::RequestService;

/// How long in-flight requests may take to finish after a shutdown signal.
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(10);

/// Starts the services and the HTTP server based on loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("gatekeep-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    web_pool.block_on(serve(config))?;
    tracing::info!("System shutdown complete");

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let socket = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address `{}`", config.bind))?;

    let services = SharedServices::new(config);
    let sweeper = services.spawn_sweeper();

    let shutdown = CancellationToken::new();
    let service = RequestService::new(services.resolver.clone(), shutdown.clone());

    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::error!("Failed to listen for the shutdown signal");
                return;
            }
            tracing::info!("Shutting down");
            // waiting callers give up right away instead of holding up the shutdown
            shutdown.cancel();
            handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
        }
    });

    tracing::info!("Starting HTTP server on {}", socket);
    let result = axum_server::bind(socket)
        .handle(handle)
        .serve(endpoints::create_app(service).into_make_service())
        .await;

    sweeper.abort();
    Ok(result?)
}
