//! Process shutdown: OS signal handling and draining of background tasks.
//!
//! One `broadcast::Sender<()>` fans the shutdown out to every dispatch loop,
//! the heartbeat task and the backplane subscriber. Dispatch loops finish
//! the batch they are processing before they observe it.

use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Resolve on Ctrl+C or SIGTERM, then broadcast shutdown.
pub async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}

/// Wait for background tasks to stop, giving up after `deadline`.
///
/// Returns the number of tasks that finished in time.
pub async fn drain_tasks(tasks: Vec<JoinHandle<()>>, deadline: Duration) -> usize {
    let total = tasks.len();
    let mut finished = 0;

    let wait_all = async {
        for task in tasks {
            match task.await {
                Ok(()) => finished += 1,
                Err(e) => tracing::error!(error = %e, "Background task panicked"),
            }
        }
    };

    if tokio::time::timeout(deadline, wait_all).await.is_err() {
        tracing::warn!(
            total = total,
            deadline_ms = deadline.as_millis() as u64,
            "Background tasks did not stop before the deadline"
        );
    }

    finished
}
