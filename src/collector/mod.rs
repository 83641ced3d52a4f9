//! Buffer table, flush scheduler, and shutdown drain bookkeeping.
//!
//! The collector owns one [`TableBuffer`] per insert signature. Pushes
//! append under that entry's exclusive access; unrelated signatures never
//! contend. Flushes are dispatched as independent tasks so a slow backend
//! cannot stall the scheduler or other buffers, and their completion is
//! observed only through the [`PendingFlushes`] counter.

mod pending;

pub use pending::{FlushGuard, PendingFlushes};

use crate::buffer::TableBuffer;
use crate::parser::InsertSig;
use crate::sender::Sender;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound on one `wait_flush` call so a polling drain loop can
/// re-check progress instead of blocking forever.
const WAIT_FLUSH_BOUND: Duration = Duration::from_millis(200);

pub struct Collector {
    tables: DashMap<InsertSig, TableBuffer>,
    sender: Arc<Sender>,
    flush_count: usize,
    pending: Arc<PendingFlushes>,
}

impl Collector {
    /// Build the collector and start its periodic flush scheduler.
    ///
    /// The scheduler runs until `shutdown` is cancelled and issues one
    /// final flush on the way out.
    pub fn spawn(
        sender: Arc<Sender>,
        flush_count: usize,
        flush_interval: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let collector = Arc::new(Self {
            tables: DashMap::new(),
            sender,
            flush_count,
            pending: PendingFlushes::new(),
        });

        tokio::spawn(flush_loop(
            Arc::clone(&collector),
            flush_interval,
            shutdown,
        ));

        collector
    }

    /// Append a payload fragment to its signature's buffer, creating the
    /// buffer on first push. Reaching the flush-count threshold dispatches
    /// the buffer immediately instead of waiting for the next tick.
    pub fn push(&self, sig: InsertSig, rows: String, row_count: usize) {
        let reached_threshold = {
            let mut buf = self.tables.entry(sig.clone()).or_default();
            buf.append(rows, row_count);
            buf.rows() >= self.flush_count
        };

        // A concurrent push may win the removal; whoever gets the buffer
        // flushes the whole accumulated payload. A push arriving after the
        // removal simply starts a fresh buffer for the signature.
        if reached_threshold
            && let Some((sig, buf)) = self.tables.remove(&sig)
        {
            self.dispatch(sig, buf);
        }
    }

    /// Drain every current buffer, dispatching one flush per non-empty
    /// entry. Returns once dispatches are issued, not once they deliver.
    pub fn flush_all(&self) {
        let signatures: Vec<InsertSig> = self.tables.iter().map(|e| e.key().clone()).collect();
        for sig in signatures {
            if let Some((sig, buf)) = self.tables.remove(&sig)
                && !buf.is_empty()
            {
                self.dispatch(sig, buf);
            }
        }
    }

    fn dispatch(&self, sig: InsertSig, buf: TableBuffer) {
        debug!(
            table = %sig.table(),
            rows = buf.rows(),
            bytes = buf.bytes(),
            age_ms = buf.age().as_millis() as u64,
            "dispatching flush"
        );

        // Increment before the task exists so a flush_all-then-wait_flush
        // sequence can never observe zero while a dispatch is in limbo.
        let guard = self.pending.begin();
        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            let _guard = guard;
            sender.send_insert(&sig, buf).await;
        });
    }

    /// Block until the pending-flush counter reaches zero, bounded per
    /// call. Intended for the shutdown drain loop.
    pub async fn wait_flush(&self) {
        let _ = tokio::time::timeout(WAIT_FLUSH_BOUND, self.pending.wait_zero()).await;
    }

    /// Number of flushes dispatched but not yet fully resolved.
    pub fn pending_flushes(&self) -> usize {
        self.pending.count()
    }

    /// Whether any buffer currently holds data.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of non-empty buffers.
    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

async fn flush_loop(collector: Arc<Collector>, interval: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so an empty proxy does
    // not flush at startup.
    tick.tick().await;

    info!(interval_ms = interval.as_millis() as u64, "flush scheduler started");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                collector.flush_all();
            }
            () = shutdown.cancelled() => {
                info!("flush scheduler stopping, draining remaining buffers");
                collector.flush_all();
                break;
            }
        }
    }
}
