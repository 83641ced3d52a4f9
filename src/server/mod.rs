//! HTTP front end: write/query submission and liveness.

use crate::collector::Collector;
use crate::parser::{ParsedQuery, parse_query};
use crate::sender::{SendError, Sender};
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind to address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub sender: Arc<Sender>,
    pub debug: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(write_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(
    listen: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ServerError::Bind {
            address: listen.to_string(),
            source: e,
        })?;
    info!("listening on {}", listener.local_addr()?);
    info!("  - POST /        (write/query submission)");
    info!("  - GET  /status  (liveness)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

/// Handler for POST /
///
/// Bufferable inserts are acknowledged as soon as they are queued; the
/// client never waits for backend delivery. Everything else is forwarded
/// and answered with the backend's literal status and body.
async fn write_handler(
    State(state): State<AppState>,
    RawQuery(target): RawQuery,
    body: String,
) -> Response {
    let target = target.unwrap_or_default();
    if state.debug {
        debug!(target = %target, body_len = body.len(), "incoming query");
    }

    match parse_query(&target, &body) {
        ParsedQuery::Insert {
            sig,
            rows,
            row_count,
        } => {
            state.collector.push(sig, rows, row_count);
            StatusCode::OK.into_response()
        }
        ParsedQuery::PassThrough { params, body } => {
            match state.sender.send_query(&params, body).await {
                Ok(outcome) => (status_code(outcome.status), outcome.body).into_response(),
                Err(SendError::Backend { status, body, .. }) => {
                    (status_code(status), body).into_response()
                }
                Err(err) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    buffered_tables: usize,
    pending_flushes: usize,
    in_flight_sends: usize,
}

/// Handler for GET /status
async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: "ok",
        buffered_tables: state.collector.len(),
        pending_flushes: state.collector.pending_flushes(),
        in_flight_sends: state.sender.in_flight(),
    })
}

fn status_code(raw: u16) -> StatusCode {
    StatusCode::from_u16(raw).unwrap_or(StatusCode::BAD_GATEWAY)
}
