//! Process wiring: configuration, logging, components, lifecycle.

mod config;
mod shutdown;

pub use config::{Cli, ClickhouseConfig, Config, ConfigError, ConfigSource, DEFAULT_CONFIG};
pub use shutdown::drain;

use crate::collector::Collector;
use crate::reliability::FileDumper;
use crate::sender::{Sender, ServerPool};
use crate::server::{self, AppState};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, source) = Config::load(&cli.config)?;
    let debug = config.debug || cli.debug;
    init_tracing(debug);

    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "loaded configuration"),
        ConfigSource::Bundled { reason } => {
            warn!(reason, "falling back to bundled default configuration");
        }
    }
    info!(
        version = crate::VERSION,
        listen = %config.listen,
        servers = config.clickhouse.servers.len(),
        flush_count = config.flush_count,
        flush_interval_ms = config.flush_interval_ms,
        "starting bulkhouse"
    );

    let dumper = FileDumper::new(&config.dump_dir);
    let mut pool = ServerPool::new();
    for url in &config.clickhouse.servers {
        pool.add_server(url.as_str());
    }
    let sender = Arc::new(Sender::new(pool, config.down_timeout(), dumper)?);

    let token = CancellationToken::new();
    shutdown::spawn_signal_watcher(token.clone());

    let collector = Collector::spawn(
        Arc::clone(&sender),
        config.flush_count,
        config.flush_interval(),
        token.child_token(),
    );

    let state = AppState {
        collector: Arc::clone(&collector),
        sender: Arc::clone(&sender),
        debug,
    };

    let served = server::serve(&config.listen, state, token.clone()).await;

    // Stop the scheduler even when the server failed to start, then drain
    // whatever made it into the buffers.
    token.cancel();
    drain(&collector, &sender, config.shutdown_timeout()).await;

    served?;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_directives = if debug { "bulkhouse=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let use_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().flatten_event(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
