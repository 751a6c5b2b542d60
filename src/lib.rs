// ============================================================================
// NL80211 EXPORTER LIBRARY
// ============================================================================
// Reads wireless statistics straight from the kernel over generic netlink
// (`nl80211`) and renders them as text exposition lines for scraping.
//
// === DATA FLOW ===
//
//   HTTP request ──► http::handle_connection
//                         │
//                         ▼
//                collector::run_collection ──► netlink::Nl80211Client
//                         │                        (one netlink session
//                         ▼                         per kernel query)
//                  metrics::format_*
//                         │
//                         ▼
//               lines streamed into the response
//
// === MODULES ===
// - netlink:   socket, message framing, attribute decoding, query engine
// - metrics:   record → exposition line formatting
// - collector: interface/station/survey orchestration for one scrape
// - http:      request parsing, routing, lazy-header streaming responses
// - server:    listeners, poll(2) accept loop, worker pool
// - config:    command-line/environment settings

pub mod collector;
pub mod config;
pub mod http;
pub mod metrics;
pub mod netlink;
pub mod server;

pub use collector::{CollectError, CollectionSummary, run_collection};
pub use config::Config;
pub use http::handle_connection;
pub use metrics::{MetricLine, MetricValue, format_interface, format_station, format_survey};
pub use server::{Server, ServerError, bind_listener, bind_listeners};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default scrape port
pub const DEFAULT_HTTP_PORT: u16 = 9100;

/// Netlink receive/send buffer size; a datagram larger than this is an error
pub const NETLINK_BUFFER_SIZE: usize = 16 * 1024;

/// Per-query kernel deadline
pub const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 5_000;

/// Client socket read/write timeout
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 10_000;

pub const LISTEN_BACKLOG: i32 = 1024;

#[cfg(test)]
mod tests;
