//! Serve — run the REST and gRPC adapters until a shutdown signal.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::rest;
use crate::rpc::{EdgeVideoServer, EdgeVideoService};
use crate::state::SharedState;

/// Bind both adapters and serve until SIGINT/SIGTERM. Cancels `cancel`
/// on the way out so background tasks stop too.
pub async fn serve(
    state: SharedState,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let http_addr: std::net::SocketAddr = state.config.http_bind_address.parse()?;
    let grpc_addr: std::net::SocketAddr = state.config.grpc_bind_address.parse()?;

    let listener = tokio::net::TcpListener::bind(http_addr).await.map_err(|e| {
        error!(addr = %http_addr, error = %e, "failed to bind REST port");
        e
    })?;

    let rest_router = rest::router(state.clone());
    let rest_cancel = cancel.clone();
    let rest_server = axum::serve(listener, rest_router)
        .with_graceful_shutdown(async move { rest_cancel.cancelled().await });

    let grpc_service = EdgeVideoService::new(state.clone());
    let grpc_cancel = cancel.clone();
    let grpc_server = tonic::transport::Server::builder()
        .add_service(EdgeVideoServer::new(grpc_service))
        .serve_with_shutdown(grpc_addr, async move { grpc_cancel.cancelled().await });

    info!(rest = %http_addr, grpc = %grpc_addr, "agent is ready to handle requests");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let (rest_result, grpc_result) = tokio::join!(rest_server, grpc_server);
    rest_result?;
    grpc_result?;

    info!("server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler: SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
