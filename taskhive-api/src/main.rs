//! taskhive API server entry point.
//!
//! Startup order: config → tracing → Postgres pool → Redis ping →
//! state wiring → router → runner. An unreachable Redis is a degraded
//! start, not a failed one; an unreachable Postgres is fatal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskhive_api::app::{build_router, AppState};
use taskhive_api::config::Config;
use taskhive_api::runner;
use taskhive_shared::db::create_pool;
use taskhive_shared::kv::{Kv, RedisKv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_from_env()?;
    init_tracing(&config.log.level);

    info!(version = env!("CARGO_PKG_VERSION"), "taskhive starting");

    let pool = create_pool(&config.database.to_pool_config()).await?;

    let kv: Option<Arc<dyn Kv>> = match RedisKv::connect(&config.redis.to_kv_config()).await {
        Ok(kv) => Some(Arc::new(kv)),
        Err(err) => {
            warn!(error = %err, "redis unreachable, starting degraded");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState::build(config.clone(), pool, kv, None, shutdown.clone())
        .map_err(|e| anyhow::anyhow!("state wiring failed: {e}"))?;
    let app = build_router(state);

    let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(1);
    let tracker = TaskTracker::new();

    runner::run_server(
        &config.http.bind_addr(),
        app,
        shutdown.clone(),
        config.http.shutdown_timeout(),
        err_tx,
        &tracker,
    )
    .await?;
    tracker.close();

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        Some(err) = err_rx.recv() => {
            error!(error = %err, "server error");
        }
    }

    shutdown.cancel();
    tracker.wait().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: &str) {
    let level = match level {
        "debug" | "info" | "warn" | "error" => level,
        _ => "info",
    };
    let default_filter = format!("taskhive_api={level},taskhive_shared={level},tower_http=warn");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
