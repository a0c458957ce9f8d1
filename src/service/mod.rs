//! Runtime wiring: message loop, eviction timer and ordered shutdown.
//!
//! Messages are processed one at a time. Each dispatch runs on the blocking
//! pool (store writes are synchronous) and is awaited before the next message
//! is taken. On shutdown the eviction timer is stopped first, then the inbound
//! channel is closed; the store is released by the caller once `run` returns.

pub mod eviction;

use crate::domain::config::ServiceConfig;
use crate::domain::dispatcher::{DispatchStats, Dispatcher};
use crate::domain::message::RawMessage;
use crate::domain::position::PositionSnapshot;
use eviction::EvictionScheduler;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub processed: u64,
    pub dropped_on_shutdown: u64,
    pub eviction_passes: u64,
    pub stats: DispatchStats,
    pub position: PositionSnapshot,
}

/// Consume `inbound` until it closes or `shutdown` flips to true.
pub async fn run(
    dispatcher: Arc<Dispatcher>,
    config: &ServiceConfig,
    mut inbound: mpsc::Receiver<RawMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> RunSummary {
    let (evict_stop_tx, evict_stop_rx) = watch::channel(false);
    let scheduler = EvictionScheduler::new(
        Arc::clone(dispatcher.index()),
        config.retention,
        config.eviction_interval,
    );
    let eviction_task = tokio::spawn(scheduler.run(evict_stop_rx));

    let mut summary = RunSummary::default();
    let mut watch_shutdown = true;
    info!("consuming messages");

    loop {
        if *shutdown.borrow() {
            info!("shutdown requested");
            break;
        }
        let message = tokio::select! {
            biased;
            changed = shutdown.changed(), if watch_shutdown => {
                if changed.is_err() {
                    // sender gone: run until the inbound stream ends
                    watch_shutdown = false;
                }
                continue;
            }
            message = inbound.recv() => message,
        };
        let Some(message) = message else {
            info!("inbound stream ended");
            break;
        };

        let worker = Arc::clone(&dispatcher);
        let topic = message.topic;
        let offset = message.offset;
        if let Err(e) = tokio::task::spawn_blocking(move || worker.handle(&message)).await {
            error!(%topic, offset, error = %e, "message handler panicked");
        }
        summary.processed += 1;
    }

    // 1. eviction timer
    let _ = evict_stop_tx.send(true);
    summary.eviction_passes = match eviction_task.await {
        Ok(passes) => passes,
        Err(e) => {
            error!(error = %e, "eviction task failed");
            0
        }
    };

    // 2. inbound messages
    inbound.close();
    while inbound.try_recv().is_ok() {
        summary.dropped_on_shutdown += 1;
    }
    if summary.dropped_on_shutdown > 0 {
        warn!(
            dropped = summary.dropped_on_shutdown,
            "unprocessed messages left for redelivery"
        );
    }

    summary.stats = dispatcher.stats();
    summary.position = dispatcher.position().snapshot();
    info!(
        processed = summary.processed,
        trades = summary.stats.trades_stored,
        windows = summary.stats.windows_stored,
        discarded = summary.stats.discarded,
        storage_failures = summary.stats.storage_failures,
        open_position = summary.position.open_position(),
        "message loop stopped"
    );
    summary
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
