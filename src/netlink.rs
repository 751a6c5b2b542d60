//! Generic netlink `nl80211` implementation
//!
//! Talks to the kernel's wireless configuration interface directly over a
//! `NETLINK_GENERIC` socket, with no libnl dependency.
//!
//! # Architecture
//!
//! ## Transport
//! - `socket`: `NETLINK_GENERIC` socket lifecycle (syscalls, RAII) and the
//!   `Transport` seam
//! - `structures`: binary headers and `nl80211` constants
//!
//! ## Protocol
//! - `message`: request building and reply framing
//! - `attributes`: policy-driven nested TLV decoding
//!
//! ## Records
//! - `interface_info`, `station_info`, `survey_info`: typed records and the
//!   attribute policies that describe them
//!
//! ## Query engine
//! - `nl80211`: family resolution and the dump loop, one session per query
//!
//! # Educational Notes
//!
//! ## Why policies are static tables
//!
//! The kernel describes every attribute space with an `nla_policy` array.
//! Mirroring those arrays as `static` slices keeps the decoder generic: the
//! same walker handles rate info, BSS parameters and survey blocks, and the
//! nesting depth can never exceed what the tables spell out.

// ============================================================================
// SUBMODULE DECLARATIONS
// ============================================================================

pub mod socket;
pub mod structures;

pub mod attributes;
pub mod message;

pub mod interface_info;
pub mod station_info;
pub mod survey_info;

pub mod nl80211;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use attributes::{AttributeError, RecordError};
pub use interface_info::{InterfaceRecord, resolve_device_name};
pub use nl80211::{Connector, Dump, KernelConnector, Nl80211Client, QueryError};
pub use socket::{NetlinkSocket, SocketError, Transport};
pub use station_info::{
    BssParam, ChannelWidth, MacAddr, RateInfo, StationFlags, StationInfo, StationRecord,
    TidStats,
};
pub use survey_info::SurveyRecord;
