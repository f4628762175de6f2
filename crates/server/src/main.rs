//! Atelier server binary
//!
//! Boots the configured service planes in one process: the HTTP surface
//! plus the step and build worker pools. SIGTERM/SIGINT stops intake,
//! drains in-flight work within the grace window, closes push
//! connections with a going-away signal, and exits 0 on a clean drain or
//! 1 on timeout. Configuration failures exit 1 before anything binds.

use std::time::Duration;

use atelier_adapters::AppConfig;
use atelier_server::{create_api_router, initialize};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
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
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    let ctx = match initialize(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "failed to initialize server");
            std::process::exit(1);
        }
    };

    // Worker planes.
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();
    if ctx.config.mode.serves_workflow() {
        let worker = ctx.step_worker.clone();
        let stop = stop_rx.clone();
        worker_handles.push(tokio::spawn(async move { worker.run(stop).await }));
    }
    if ctx.config.mode.serves_builder() {
        let worker = ctx.build_worker.clone();
        let stop = stop_rx.clone();
        worker_handles.push(tokio::spawn(async move { worker.run(stop).await }));
    }

    // HTTP plane.
    let app = create_api_router(&ctx);
    let addr = format!("0.0.0.0:{}", ctx.config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, mode = ctx.config.mode.as_str(), "server listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "http server error");
        std::process::exit(1);
    }

    // Stop intake, then drain within the grace window.
    info!("shutdown: stopping queue consumers");
    let _ = stop_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }

    let grace = ctx.config.shutdown_grace;
    let step_drained = if ctx.config.mode.serves_workflow() {
        ctx.step_worker
            .drain(ctx.config.worker.step_concurrency, grace)
            .await
    } else {
        true
    };
    let build_drained = if ctx.config.mode.serves_builder() {
        ctx.build_worker.drain(grace).await
    } else {
        true
    };

    info!("shutdown: closing push connections");
    ctx.push_bus.begin_shutdown();
    // Give going-away frames a moment to flush.
    tokio::time::sleep(Duration::from_millis(200)).await;

    if step_drained && build_drained {
        info!("shutdown complete");
        std::process::exit(0);
    }
    error!("shutdown drain window elapsed with work in flight");
    std::process::exit(1);
}
