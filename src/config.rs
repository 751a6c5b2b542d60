//! Command-line and environment configuration

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::{
    DEFAULT_CLIENT_TIMEOUT_MS, DEFAULT_HTTP_PORT, DEFAULT_SCRAPE_TIMEOUT_MS, LISTEN_BACKLOG,
};

fn default_listen_addrs() -> Vec<SocketAddr> {
    vec![
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_HTTP_PORT)),
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_HTTP_PORT)),
    ]
}

/// Twice the CPU count, clamped to 4..=16 (the work is I/O bound)
#[must_use]
pub fn default_worker_count() -> usize {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4);
    (cpu_count * 2).clamp(4, 16)
}

/// Exporter settings; every flag can also come from the environment
#[derive(Debug, Clone, Parser)]
#[command(name = "nl80211-exporter", version, about = "Exports nl80211 wireless statistics as text metrics")]
pub struct Config {
    /// Address to listen on (repeatable)
    #[arg(
        long = "listen",
        value_name = "ADDR",
        env = "NL80211_EXPORTER_LISTEN",
        value_delimiter = ',',
        default_values_t = default_listen_addrs()
    )]
    pub listen: Vec<SocketAddr>,

    /// Worker threads [default: 2x CPUs, clamped to 4..=16]
    #[arg(long, value_name = "N", env = "NL80211_EXPORTER_WORKERS",
          value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Deadline for each kernel query, in milliseconds
    #[arg(long, value_name = "MS", env = "NL80211_EXPORTER_SCRAPE_TIMEOUT",
          default_value_t = DEFAULT_SCRAPE_TIMEOUT_MS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub scrape_timeout: u64,

    /// Read/write timeout on client connections, in milliseconds
    #[arg(long, value_name = "MS", env = "NL80211_EXPORTER_CLIENT_TIMEOUT",
          default_value_t = DEFAULT_CLIENT_TIMEOUT_MS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub client_timeout: u64,

    /// listen(2) backlog
    #[arg(long, value_name = "N", env = "NL80211_EXPORTER_BACKLOG",
          default_value_t = LISTEN_BACKLOG,
          value_parser = clap::value_parser!(i32).range(1..))]
    pub backlog: i32,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long, value_name = "LEVEL", env = "NL80211_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .map_or_else(default_worker_count, usize::from)
    }

    #[must_use]
    pub const fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout)
    }

    #[must_use]
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout)
    }
}
