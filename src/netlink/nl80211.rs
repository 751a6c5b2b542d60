//! `nl80211` query engine
//!
//! Runs the three dumps the exporter needs. Every call owns one fresh
//! session from start to finish:
//!
//! ```text
//! connect ──► CTRL_CMD_GETFAMILY("nl80211") ──► family id
//!         ──► NL80211_CMD_GET_* (NLM_F_DUMP) ──► replies ... NLMSG_DONE
//!         ──► drop (socket closed)
//! ```
//!
//! The receive loop is bounded by a deadline. Before every `recv()` the
//! transport's receive timeout (`SO_RCVTIMEO` on a real socket) is cut down
//! to the time left, so no single wait can run past the deadline.
//!
//! Record-level problems (missing or malformed attributes) skip that record
//! and are counted in [`Dump::skipped`]. Anything wrong with the session
//! itself ends the query with a [`QueryError`].

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::NETLINK_BUFFER_SIZE;
use crate::netlink::attributes::{AttrKind, AttributeError, RecordError, decode};
use crate::netlink::interface_info::{InterfaceRecord, decode_interface_message};
use crate::netlink::message::{
    GenlMessageBuilder, MessageError, ParsedMessage, build_get_family_request,
    parse_netlink_messages,
};
use crate::netlink::socket::{NetlinkSocket, SocketError, Transport};
use crate::netlink::station_info::{StationRecord, decode_station_message};
use crate::netlink::structures::*;
use crate::netlink::survey_info::{SurveyRecord, decode_survey_message};

const FAMILY_SEQ: u32 = 1;
const DUMP_SEQ: u32 = 2;

static CTRL_REPLY_POLICY: [(u16, AttrKind); 2] = [
    (CTRL_ATTR_FAMILY_ID, AttrKind::U16),
    (CTRL_ATTR_FAMILY_NAME, AttrKind::String),
];

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure of a whole query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot open generic netlink socket: {0}")]
    TransportUnavailable(#[source] SocketError),

    #[error("generic netlink family {0:?} not found")]
    FamilyNotFound(&'static str),

    #[error("malformed controller reply: {0}")]
    ControllerReply(#[from] AttributeError),

    #[error("netlink transport error: {0}")]
    Io(#[source] SocketError),

    #[error("reply datagram of {len} bytes exceeds the {capacity}-byte receive buffer")]
    Truncated { len: usize, capacity: usize },

    #[error("malformed reply: {0}")]
    Protocol(#[from] MessageError),

    #[error("kernel returned error: {}", os_error(.errno))]
    Kernel { errno: i32 },

    #[error("no complete reply within {0:?}")]
    DeadlineExceeded(Duration),
}

fn os_error(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

impl QueryError {
    /// The driver does not implement the requested command for this device
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, QueryError::Kernel { errno } if *errno == libc::EOPNOTSUPP)
    }
}

// ============================================================================
// CONNECTOR SEAM
// ============================================================================

/// Opens one kernel session per query
pub trait Connector {
    type Transport: Transport;

    /// # Errors
    ///
    /// Returns `SocketError` when the transport cannot be allocated.
    fn connect(&self) -> Result<Self::Transport, SocketError>;
}

/// Real kernel connector
#[derive(Debug, Clone, Copy)]
pub struct KernelConnector {
    recv_timeout: Duration,
}

impl KernelConnector {
    #[must_use]
    pub fn new(recv_timeout: Duration) -> Self {
        Self { recv_timeout }
    }
}

impl Connector for KernelConnector {
    type Transport = NetlinkSocket;

    fn connect(&self) -> Result<NetlinkSocket, SocketError> {
        NetlinkSocket::new(self.recv_timeout)
    }
}

// ============================================================================
// QUERY CLIENT
// ============================================================================

/// Records from one dump plus the number that failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump<T> {
    pub records: Vec<T>,
    pub skipped: usize,
    /// The kernel flagged the dump with `NLM_F_DUMP_INTR`; the records may
    /// mix state from before and after a concurrent change
    pub interrupted: bool,
}

impl<T> Default for Dump<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
            interrupted: false,
        }
    }
}

/// `nl80211` query client
///
/// Holds no session; each `collect_*` call opens and closes its own, so a
/// client is cheap to clone into workers.
#[derive(Debug)]
pub struct Nl80211Client<C> {
    connector: Arc<C>,
    timeout: Duration,
}

impl<C> Clone for Nl80211Client<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            timeout: self.timeout,
        }
    }
}

impl Nl80211Client<KernelConnector> {
    /// Client backed by real netlink sockets
    #[must_use]
    pub fn kernel(timeout: Duration) -> Self {
        Self::new(KernelConnector::new(timeout), timeout)
    }
}

impl<C: Connector> Nl80211Client<C> {
    #[must_use]
    pub fn new(connector: C, timeout: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            timeout,
        }
    }

    /// Dump all wireless interfaces
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if the session fails at any step.
    pub fn collect_interfaces(&self) -> Result<Dump<InterfaceRecord>, QueryError> {
        self.dump(
            NL80211_CMD_GET_INTERFACE,
            NL80211_CMD_NEW_INTERFACE,
            None,
            decode_interface_message,
        )
    }

    /// Dump the stations known to one interface
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if the session fails at any step.
    pub fn collect_stations(&self, ifindex: u32) -> Result<Dump<StationRecord>, QueryError> {
        self.dump(
            NL80211_CMD_GET_STATION,
            NL80211_CMD_NEW_STATION,
            Some(ifindex),
            decode_station_message,
        )
    }

    /// Dump the channel survey of one interface
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if the session fails at any step.
    pub fn collect_survey(&self, ifindex: u32) -> Result<Dump<SurveyRecord>, QueryError> {
        self.dump(
            NL80211_CMD_GET_SURVEY,
            NL80211_CMD_NEW_SURVEY_RESULTS,
            Some(ifindex),
            decode_survey_message,
        )
    }

    fn dump<T>(
        &self,
        cmd: u8,
        reply_cmd: u8,
        ifindex: Option<u32>,
        decode_record: fn(&[u8]) -> Result<T, RecordError>,
    ) -> Result<Dump<T>, QueryError> {
        let deadline = Instant::now() + self.timeout;
        let mut transport = self
            .connector
            .connect()
            .map_err(QueryError::TransportUnavailable)?;
        let mut buffer = vec![0u8; NETLINK_BUFFER_SIZE];

        let family = resolve_family(&mut transport, &mut buffer, deadline, self.timeout)?;

        let mut request = GenlMessageBuilder::new(
            family,
            cmd,
            NL80211_VERSION,
            NLM_F_REQUEST | NLM_F_DUMP,
            DUMP_SEQ,
        );
        if let Some(ifindex) = ifindex {
            request.attrs().put_u32(NL80211_ATTR_IFINDEX, ifindex);
        }
        transport.send(&request.finish()).map_err(QueryError::Io)?;

        let mut dump = Dump::default();

        loop {
            let datagram = receive(&mut transport, &mut buffer, deadline, self.timeout)?;
            for message in parse_netlink_messages(datagram)? {
                match message {
                    ParsedMessage::Done => {
                        if dump.interrupted {
                            warn!(cmd, "dump interrupted by a concurrent change, results may be inconsistent");
                        }
                        debug!(
                            cmd,
                            ?ifindex,
                            records = dump.records.len(),
                            skipped = dump.skipped,
                            "dump complete"
                        );
                        return Ok(dump);
                    }
                    ParsedMessage::Error(0) | ParsedMessage::Other(_) => {}
                    ParsedMessage::Error(errno) => return Err(QueryError::Kernel { errno }),
                    ParsedMessage::Generic(msg) => {
                        dump.interrupted |= msg.dump_interrupted();
                        if msg.genl.cmd != reply_cmd {
                            debug!(cmd, got = msg.genl.cmd, "ignoring unexpected reply command");
                            continue;
                        }
                        match decode_record(msg.payload) {
                            Ok(record) => dump.records.push(record),
                            Err(e) => {
                                warn!(cmd, ?ifindex, error = %e, "skipping record");
                                dump.skipped += 1;
                            }
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// SESSION HELPERS
// ============================================================================

/// Ask the generic netlink controller for the `nl80211` family id
fn resolve_family<T: Transport>(
    transport: &mut T,
    buffer: &mut [u8],
    deadline: Instant,
    timeout: Duration,
) -> Result<u16, QueryError> {
    let request = build_get_family_request(NL80211_FAMILY_NAME, FAMILY_SEQ);
    transport.send(&request).map_err(QueryError::Io)?;

    loop {
        let datagram = receive(transport, buffer, deadline, timeout)?;
        for message in parse_netlink_messages(datagram)? {
            match message {
                ParsedMessage::Generic(msg) if msg.genl.cmd == CTRL_CMD_NEWFAMILY => {
                    let attrs = decode(msg.payload, &CTRL_REPLY_POLICY)?;
                    return attrs
                        .u16(CTRL_ATTR_FAMILY_ID)
                        .ok_or(QueryError::FamilyNotFound(NL80211_FAMILY_NAME));
                }
                ParsedMessage::Error(libc::ENOENT) | ParsedMessage::Done => {
                    return Err(QueryError::FamilyNotFound(NL80211_FAMILY_NAME));
                }
                ParsedMessage::Error(0) => {}
                ParsedMessage::Error(errno) => return Err(QueryError::Kernel { errno }),
                ParsedMessage::Generic(_) | ParsedMessage::Other(_) => {}
            }
        }
    }
}

/// Receive one datagram, enforcing the deadline and buffer size
///
/// The transport may block for at most the time left until `deadline`.
fn receive<'b, T: Transport>(
    transport: &mut T,
    buffer: &'b mut [u8],
    deadline: Instant,
    timeout: Duration,
) -> Result<&'b [u8], QueryError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(QueryError::DeadlineExceeded(timeout));
    }
    transport
        .set_recv_timeout(remaining)
        .map_err(QueryError::Io)?;
    let len = transport.recv(buffer).map_err(|e| {
        if e.is_timeout() {
            QueryError::DeadlineExceeded(timeout)
        } else {
            QueryError::Io(e)
        }
    })?;
    if len > buffer.len() {
        return Err(QueryError::Truncated {
            len,
            capacity: buffer.len(),
        });
    }
    Ok(&buffer[..len])
}

// ============================================================================
// TESTS
// ============================================================================
