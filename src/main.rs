// ============================================================================
// nl80211 exporter - Main Entry Point
// ============================================================================
//
// Serves wireless interface, station and survey statistics over HTTP.
//
// Architecture:
// - Main thread: poll(2) over every listener, accept, hand off
// - Worker threads: one connection each (thread pool), one collection per
//   /metrics request, no shared mutable state
// - Shutdown: Ctrl-C clears a flag; the accept loop notices within 500 ms
//
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nl80211_exporter::netlink::Nl80211Client;
use nl80211_exporter::{Config, Server, bind_listeners};

fn init_logging(default_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level {default_level:?}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level)?;

    let workers = config.worker_count();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers,
        scrape_timeout_ms = config.scrape_timeout,
        client_timeout_ms = config.client_timeout,
        "starting nl80211 exporter"
    );

    let listeners =
        bind_listeners(&config.listen, config.backlog).context("cannot bind any listener")?;

    let client = Nl80211Client::kernel(config.scrape_timeout());
    let server = Server::new(listeners, client, workers, config.client_timeout());
    for addr in server.local_addrs() {
        info!(address = %addr, "serving /metrics");
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("cannot install Ctrl-C handler")?;

    server.run(&running).context("accept loop failed")?;
    info!("shut down");
    Ok(())
}
