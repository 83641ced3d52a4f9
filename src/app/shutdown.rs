//! Signal handling and the shutdown drain.

use crate::collector::Collector;
use crate::sender::Sender;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cancel `token` when SIGINT or SIGTERM arrives.
pub fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Flush every buffer and wait for in-flight deliveries to resolve,
/// bounded by `deadline`.
///
/// The flush is re-issued on every iteration so a push that raced the
/// final flush still gets delivered. Past the deadline remaining work is
/// abandoned; the dump fallback has already persisted anything whose
/// delivery finished failing.
pub async fn drain(collector: &Collector, sender: &Sender, deadline: Duration) {
    info!(deadline_secs = deadline.as_secs(), "draining buffered inserts");
    collector.flush_all();

    let start = Instant::now();
    loop {
        let buffered = collector.len();
        let pending = collector.pending_flushes();
        let in_flight = sender.in_flight();

        if buffered == 0 && pending == 0 && in_flight == 0 {
            info!("drain complete");
            return;
        }
        if start.elapsed() >= deadline {
            warn!(
                buffered,
                pending, in_flight, "drain deadline exceeded, abandoning remaining work"
            );
            return;
        }

        debug!(buffered, pending, in_flight, "waiting for flushes to settle");
        collector.wait_flush().await;
        collector.flush_all();
    }
}
