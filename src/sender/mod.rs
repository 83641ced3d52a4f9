//! Delivery of statements to the backend pool with failover.
//!
//! Every send tries healthy servers in round-robin order, marking each
//! failed one down for the configured timeout. Pass-through sends surface
//! the last failure to the caller; merged-insert flushes fall back to the
//! on-disk dumper instead, so a flush either reaches a backend or is
//! persisted, never silently discarded.

mod pool;

pub use pool::ServerPool;

use crate::buffer::TableBuffer;
use crate::parser::InsertSig;
use crate::reliability::FileDumper;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Per-request timeout against one backend.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SendError {
    #[error("no healthy server available")]
    NoHealthyServer,
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Backend {
        url: String,
        status: u16,
        body: String,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// A backend's accepted response.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: u16,
    pub body: String,
}

pub struct Sender {
    pool: ServerPool,
    client: reqwest::Client,
    down_timeout: Duration,
    dumper: FileDumper,
    in_flight: AtomicUsize,
}

impl Sender {
    pub fn new(
        pool: ServerPool,
        down_timeout: Duration,
        dumper: FileDumper,
    ) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SendError::Client)?;

        Ok(Self {
            pool,
            client,
            down_timeout,
            dumper,
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Number of sends currently in flight; shutdown visibility only.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Forward a pass-through statement one-for-one.
    ///
    /// On exhaustion the last failure is surfaced: a `Backend` error keeps
    /// the backend's literal status and body for the client.
    pub async fn send_query(&self, params: &str, body: String) -> Result<SendOutcome, SendError> {
        let _guard = self.track();
        self.try_servers(params, &body).await
    }

    /// Deliver a merged insert, dumping to disk when every server fails.
    ///
    /// Never returns an error: the client already got its acknowledgment
    /// when the payload was buffered.
    pub async fn send_insert(&self, sig: &InsertSig, buf: TableBuffer) {
        let _guard = self.track();
        let rows = buf.rows();
        let statement = sig.assemble(&buf.merge(sig.format().separator()));

        match self.try_servers(sig.params(), &statement).await {
            Ok(outcome) => {
                info!(
                    table = %sig.table(),
                    rows,
                    status = outcome.status,
                    "flushed merged insert"
                );
            }
            Err(err) => {
                error!(
                    table = %sig.table(),
                    rows,
                    error = %err,
                    "every server failed, dumping merged insert"
                );
                match self.dumper.dump(sig.table(), sig.params(), &statement).await {
                    Ok(path) => {
                        warn!(table = %sig.table(), path = %path.display(), "undeliverable insert dumped");
                    }
                    Err(dump_err) => {
                        error!(
                            table = %sig.table(),
                            rows,
                            error = %dump_err,
                            "dump failed, merged insert lost"
                        );
                    }
                }
            }
        }
    }

    async fn try_servers(&self, params: &str, statement: &str) -> Result<SendOutcome, SendError> {
        let mut tried = HashSet::new();
        let mut last_err = SendError::NoHealthyServer;

        while let Some(idx) = self.pool.pick_healthy(&tried) {
            tried.insert(idx);
            let Some(base) = self.pool.url(idx) else {
                continue;
            };

            match self.post(base, params, statement).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    warn!(
                        server = base,
                        error = %err,
                        down_secs = self.down_timeout.as_secs(),
                        "send failed, marking server down"
                    );
                    self.pool.mark_down(idx, self.down_timeout);
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    async fn post(&self, base: &str, params: &str, statement: &str) -> Result<SendOutcome, SendError> {
        let url = if params.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/?{params}")
        };

        let response = self
            .client
            .post(&url)
            .body(statement.to_string())
            .send()
            .await
            .map_err(|source| SendError::Transport {
                url: base.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| SendError::Transport {
                url: base.to_string(),
                source,
            })?;

        if status.is_success() {
            Ok(SendOutcome {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(SendError::Backend {
                url: base.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }

    fn track(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            counter: &self.in_flight,
        }
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
