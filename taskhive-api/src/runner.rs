/// Graceful-shutdown server runner.
///
/// Binds the listener up front (bind errors fail startup synchronously),
/// then spawns two tracked tasks: one serves, one watches the cancellation
/// token and bounds the drain. After cancellation, in-flight requests get
/// `shutdown_timeout` to finish; past that the serve task is aborted and
/// the listener hard-closed. Errors other than a clean close flow into the
/// shared error channel.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub async fn run_server(
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    err_tx: mpsc::Sender<anyhow::Error>,
    tracker: &TaskTracker,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot listen on {addr}: {e}"))?;
    info!(addr = %listener.local_addr()?, "http server listening");

    let drain_token = shutdown.clone();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { drain_token.cancelled().await });

    let mut serve_handle = tracker.spawn(async move {
        if let Err(e) = serve.await {
            let _ = err_tx.send(anyhow::anyhow!("http server error: {e}")).await;
        }
    });

    tracker.spawn(async move {
        shutdown.cancelled().await;
        if tokio::time::timeout(shutdown_timeout, &mut serve_handle)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "shutdown timeout exceeded, closing listener"
            );
            serve_handle.abort();
        }
    });

    Ok(())
}
