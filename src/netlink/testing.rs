//! Scripted kernel sessions for tests
//!
//! A [`ScriptedConnector`] hands out one pre-recorded session per
//! `connect()`. Each session replays datagrams (or I/O failures) in order and
//! reports `WouldBlock` once it runs dry, which the query engine treats like
//! an expired `SO_RCVTIMEO`. Timed steps honour the receive timeout the
//! engine installs, the way a real socket does. Requests sent by the engine
//! are recorded, and so is every session opened and closed.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::netlink::message::{AttrWriter, GenlMessageBuilder};
use crate::netlink::nl80211::Connector;
use crate::netlink::socket::{SocketError, Transport};
use crate::netlink::structures::*;

pub const TEST_FAMILY_ID: u16 = 0x1c;

pub const STA_A: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0a];
pub const STA_B: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0b];
pub const STA_C: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0c];

/// One scripted `recv()` outcome
#[derive(Debug, Clone)]
pub enum Step {
    Datagram(Vec<u8>),
    /// Datagram that arrives after a delay, unless the receive timeout
    /// expires first (then the datagram is lost)
    Delayed(Duration, Vec<u8>),
    /// Nothing arrives; blocks for the whole receive timeout
    Silent,
    Fail(io::ErrorKind),
}

enum Session {
    Steps(Vec<Step>),
    Unavailable,
}

#[derive(Default)]
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<Session>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session with exactly these `recv()` outcomes
    pub fn session(&self, steps: Vec<Step>) {
        self.sessions.lock().unwrap().push_back(Session::Steps(steps));
    }

    /// Queue a session that resolves the family, then replays `datagrams`
    pub fn dump_session(&self, datagrams: Vec<Vec<u8>>) {
        let mut steps = vec![Step::Datagram(family_reply(TEST_FAMILY_ID))];
        steps.extend(datagrams.into_iter().map(Step::Datagram));
        self.session(steps);
    }

    /// Queue a session whose socket cannot be opened
    pub fn unavailable_session(&self) {
        self.sessions.lock().unwrap().push_back(Session::Unavailable);
    }

    /// Every request sent over any session, in order
    pub fn sent(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    pub fn sessions_opened(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }

    /// Every receive timeout installed over any session, in order
    pub fn recv_timeouts(&self) -> Arc<Mutex<Vec<Duration>>> {
        Arc::clone(&self.timeouts)
    }

    /// Sessions whose transport has been dropped
    pub fn sessions_closed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn connect(&self) -> Result<ScriptedTransport, SocketError> {
        let unavailable = || {
            SocketError::new(
                "socket(NETLINK_GENERIC) failed",
                io::Error::from(io::ErrorKind::PermissionDenied),
            )
        };
        match self.sessions.lock().unwrap().pop_front() {
            Some(Session::Steps(steps)) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedTransport {
                    steps: steps.into(),
                    sent: Arc::clone(&self.sent),
                    closed: Arc::clone(&self.closed),
                    recv_timeout: None,
                    timeouts: Arc::clone(&self.timeouts),
                })
            }
            Some(Session::Unavailable) | None => Err(unavailable()),
        }
    }
}

pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
    recv_timeout: Option<Duration>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl ScriptedTransport {
    fn deliver(datagram: &[u8], buffer: &mut [u8]) -> usize {
        let copied = datagram.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&datagram[..copied]);
        // Full length, like MSG_TRUNC
        datagram.len()
    }
}

fn would_block() -> SocketError {
    SocketError::new("recv() failed", io::Error::from(io::ErrorKind::WouldBlock))
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        match self.steps.pop_front() {
            Some(Step::Datagram(datagram)) => Ok(Self::deliver(&datagram, buffer)),
            Some(Step::Delayed(delay, datagram)) => match self.recv_timeout {
                Some(timeout) if timeout <= delay => {
                    std::thread::sleep(timeout);
                    Err(would_block())
                }
                _ => {
                    std::thread::sleep(delay);
                    Ok(Self::deliver(&datagram, buffer))
                }
            },
            Some(Step::Silent) => {
                if let Some(timeout) = self.recv_timeout {
                    std::thread::sleep(timeout);
                }
                Err(would_block())
            }
            Some(Step::Fail(kind)) => Err(SocketError::new("recv() failed", io::Error::from(kind))),
            None => Err(would_block()),
        }
    }

    fn set_recv_timeout(&mut self, timeout: Duration) -> Result<(), SocketError> {
        self.recv_timeout = Some(timeout);
        self.timeouts.lock().unwrap().push(timeout);
        Ok(())
    }
}

// ============================================================================
// REPLY BUILDERS
// ============================================================================

pub fn concat(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.concat()
}

pub fn family_reply(family_id: u16) -> Vec<u8> {
    let mut msg = GenlMessageBuilder::new(GENL_ID_CTRL, CTRL_CMD_NEWFAMILY, CTRL_VERSION, 0, 1);
    msg.attrs()
        .put_str(CTRL_ATTR_FAMILY_NAME, NL80211_FAMILY_NAME)
        .put_u16(CTRL_ATTR_FAMILY_ID, family_id);
    msg.finish()
}

pub fn done_message(seq: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    NlMsgHdr {
        nlmsg_len: nlmsg_length(4),
        nlmsg_type: NLMSG_DONE,
        nlmsg_flags: NLM_F_MULTI,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    }
    .write_to(&mut buf);
    buf.extend_from_slice(&0i32.to_ne_bytes());
    buf
}

/// `NLMSG_ERROR` carrying `-errno` followed by the echoed request header
pub fn error_message(seq: u32, errno: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    NlMsgHdr {
        nlmsg_len: nlmsg_length(4 + NlMsgHdr::SIZE),
        nlmsg_type: NLMSG_ERROR,
        nlmsg_flags: 0,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    }
    .write_to(&mut buf);
    buf.extend_from_slice(&(-errno).to_ne_bytes());
    buf.extend_from_slice(&[0u8; NlMsgHdr::SIZE]);
    buf
}

/// Mark a reply as part of a dump the kernel had to restart
pub fn interrupted(mut message: Vec<u8>) -> Vec<u8> {
    let mut header = NlMsgHdr::from_bytes(&message).unwrap();
    header.nlmsg_flags |= NLM_F_DUMP_INTR;
    let mut patched = Vec::with_capacity(NlMsgHdr::SIZE);
    header.write_to(&mut patched);
    message[..NlMsgHdr::SIZE].copy_from_slice(&patched);
    message
}

fn reply(cmd: u8) -> GenlMessageBuilder {
    GenlMessageBuilder::new(TEST_FAMILY_ID, cmd, NL80211_VERSION, NLM_F_MULTI, 2)
}

pub fn interface_message(ifindex: u32, name: &str) -> Vec<u8> {
    let mut msg = reply(NL80211_CMD_NEW_INTERFACE);
    msg.attrs()
        .put_u32(NL80211_ATTR_IFINDEX, ifindex)
        .put_str(NL80211_ATTR_IFNAME, name);
    msg.finish()
}

pub fn station_message<F>(ifindex: u32, mac: [u8; 6], fill: F) -> Vec<u8>
where
    F: FnOnce(&mut AttrWriter),
{
    let mut msg = reply(NL80211_CMD_NEW_STATION);
    msg.attrs()
        .put_u32(NL80211_ATTR_IFINDEX, ifindex)
        .put_bytes(NL80211_ATTR_MAC, &mac)
        .put_nested(NL80211_ATTR_STA_INFO, fill);
    msg.finish()
}

pub fn survey_message<F>(ifindex: u32, frequency_mhz: u32, fill: F) -> Vec<u8>
where
    F: FnOnce(&mut AttrWriter),
{
    let mut msg = reply(NL80211_CMD_NEW_SURVEY_RESULTS);
    msg.attrs()
        .put_u32(NL80211_ATTR_IFINDEX, ifindex)
        .put_nested(NL80211_ATTR_SURVEY_INFO, |survey| {
            survey.put_u32(NL80211_SURVEY_INFO_FREQUENCY, frequency_mhz);
            fill(survey);
        });
    msg.finish()
}
