//! Generic netlink message construction and parsing
//!
//! This module builds generic netlink requests (controller lookups and
//! `nl80211` dumps) and splits kernel reply datagrams into individual
//! messages.
//!
//! # Educational Notes
//!
//! ## Generic Netlink Framing
//!
//! Generic netlink adds a small header between the netlink header and the
//! attribute payload:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ NlMsgHdr (16 bytes)         │  nlmsg_type = resolved family id
//! ├─────────────────────────────┤
//! │ GenlMsgHdr (4 bytes)        │  cmd, version, reserved
//! ├─────────────────────────────┤
//! │ Attributes (TLV, aligned)   │  NL80211_ATTR_*
//! └─────────────────────────────┘
//! ```
//!
//! ## Families are resolved at runtime
//!
//! Unlike classic netlink protocols, a generic family has no fixed message
//! type. The kernel assigns it an id, and user space asks the controller
//! (`GENL_ID_CTRL`) for it by name before sending any family request.
//!
//! ## Multi-part Replies
//!
//! A dump reply spans several datagrams, each holding one or more messages:
//!
//! ```text
//! datagram 1: [ NEW_STATION ] [ NEW_STATION ]
//! datagram 2: [ NEW_STATION ] [ NLMSG_DONE ]
//! ```
//!
//! Parsing stops at `NLMSG_DONE` or at a non-zero `NLMSG_ERROR`.

use thiserror::Error;

use crate::netlink::structures::*;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Framing errors in a reply datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("invalid message length {len} at offset {offset} (minimum is {min})")]
    InvalidLength { offset: usize, len: usize, min: usize },

    #[error("message length {len} at offset {offset} exceeds datagram of {available} bytes")]
    Overrun {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("message at offset {offset} is too short for a generic netlink header")]
    MissingGenlHeader { offset: usize },

    #[error("error message at offset {offset} is too short to carry an errno")]
    ShortErrorMessage { offset: usize },
}

// ============================================================================
// ATTRIBUTE WRITER
// ============================================================================

/// Append-only TLV attribute buffer
///
/// Every attribute is padded to a 4-byte boundary as it is written.
#[derive(Debug, Default, Clone)]
pub struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&mut self, id: u16, payload: &[u8]) -> &mut Self {
        self.buf
            .extend_from_slice(&nla_length(payload.len()).to_ne_bytes());
        self.buf.extend_from_slice(&id.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.pad();
        self
    }

    pub fn put_u8(&mut self, id: u16, value: u8) -> &mut Self {
        self.put_bytes(id, &[value])
    }

    pub fn put_u16(&mut self, id: u16, value: u16) -> &mut Self {
        self.put_bytes(id, &value.to_ne_bytes())
    }

    pub fn put_u32(&mut self, id: u16, value: u32) -> &mut Self {
        self.put_bytes(id, &value.to_ne_bytes())
    }

    pub fn put_u64(&mut self, id: u16, value: u64) -> &mut Self {
        self.put_bytes(id, &value.to_ne_bytes())
    }

    pub fn put_flag(&mut self, id: u16) -> &mut Self {
        self.put_bytes(id, &[])
    }

    /// NUL-terminated string, as the kernel expects for `NLA_NUL_STRING`
    pub fn put_str(&mut self, id: u16, value: &str) -> &mut Self {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_bytes(id, &payload)
    }

    /// Nested attribute block; `fill` writes the children
    pub fn put_nested<F>(&mut self, id: u16, fill: F) -> &mut Self
    where
        F: FnOnce(&mut AttrWriter),
    {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0u8; NlAttr::SIZE]);
        fill(self);
        let len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
        self.buf[start + 2..start + 4].copy_from_slice(&(id | NLA_F_NESTED).to_ne_bytes());
        self
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn pad(&mut self) {
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}

// ============================================================================
// REQUEST BUILDER
// ============================================================================

/// Builder for one generic netlink message
///
/// ```ignore
/// let mut msg = GenlMessageBuilder::new(family, NL80211_CMD_GET_STATION,
///     NL80211_VERSION, NLM_F_REQUEST | NLM_F_DUMP, seq);
/// msg.attrs().put_u32(NL80211_ATTR_IFINDEX, ifindex);
/// socket.send(&msg.finish())?;
/// ```
#[derive(Debug, Clone)]
pub struct GenlMessageBuilder {
    msg_type: u16,
    flags: u16,
    seq: u32,
    genl: GenlMsgHdr,
    attrs: AttrWriter,
}

impl GenlMessageBuilder {
    #[must_use]
    pub fn new(msg_type: u16, cmd: u8, version: u8, flags: u16, seq: u32) -> Self {
        Self {
            msg_type,
            flags,
            seq,
            genl: GenlMsgHdr {
                cmd,
                version,
                reserved: 0,
            },
            attrs: AttrWriter::new(),
        }
    }

    pub fn attrs(&mut self) -> &mut AttrWriter {
        &mut self.attrs
    }

    /// Serialize with `nlmsg_len` covering headers and attributes
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let payload_len = GenlMsgHdr::SIZE + self.attrs.buf.len();
        let mut buf = Vec::with_capacity(nlmsg_align(NlMsgHdr::SIZE + payload_len));
        NlMsgHdr {
            nlmsg_len: nlmsg_length(payload_len),
            nlmsg_type: self.msg_type,
            nlmsg_flags: self.flags,
            nlmsg_seq: self.seq,
            nlmsg_pid: 0,
        }
        .write_to(&mut buf);
        self.genl.write_to(&mut buf);
        buf.extend_from_slice(&self.attrs.buf);
        buf
    }
}

/// Build the controller request that resolves a family name to its id
#[must_use]
pub fn build_get_family_request(name: &str, seq: u32) -> Vec<u8> {
    let mut msg = GenlMessageBuilder::new(
        GENL_ID_CTRL,
        CTRL_CMD_GETFAMILY,
        CTRL_VERSION,
        NLM_F_REQUEST,
        seq,
    );
    msg.attrs().put_str(CTRL_ATTR_FAMILY_NAME, name);
    msg.finish()
}

// ============================================================================
// REPLY PARSING
// ============================================================================

/// One generic netlink message borrowed from a reply datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenlMessage<'a> {
    pub header: NlMsgHdr,
    pub genl: GenlMsgHdr,
    /// Attribute bytes following the generic header
    pub payload: &'a [u8],
}

impl GenlMessage<'_> {
    /// The kernel flagged the dump as interrupted by a concurrent change
    #[must_use]
    pub fn dump_interrupted(&self) -> bool {
        self.header.nlmsg_flags & NLM_F_DUMP_INTR != 0
    }
}

/// Parsed message from a reply datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage<'a> {
    /// Family payload (any type at or above `GENL_ID_CTRL`)
    Generic(GenlMessage<'a>),
    /// End of a multi-part reply
    Done,
    /// `NLMSG_ERROR`; the positive errno, or 0 for an acknowledgement
    Error(i32),
    /// `NLMSG_NOOP`, `NLMSG_OVERRUN` and reserved types
    Other(u16),
}

/// Split a reply datagram into messages
///
/// Stops after `NLMSG_DONE` or a non-zero error.
///
/// # Errors
///
/// Returns `MessageError` when a length field is impossible for the buffer.
pub fn parse_netlink_messages(data: &[u8]) -> Result<Vec<ParsedMessage<'_>>, MessageError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while let Some(header) = NlMsgHdr::from_bytes(&data[offset..]) {
        let msg_len = header.nlmsg_len as usize;
        if msg_len < NlMsgHdr::SIZE {
            return Err(MessageError::InvalidLength {
                offset,
                len: msg_len,
                min: NlMsgHdr::SIZE,
            });
        }
        if msg_len > data.len() - offset {
            return Err(MessageError::Overrun {
                offset,
                len: msg_len,
                available: data.len() - offset,
            });
        }
        let body = &data[offset + NlMsgHdr::SIZE..offset + msg_len];

        match header.nlmsg_type {
            NLMSG_DONE => {
                messages.push(ParsedMessage::Done);
                break;
            }
            NLMSG_ERROR => {
                let errno = parse_error_message(body)
                    .ok_or(MessageError::ShortErrorMessage { offset })?;
                messages.push(ParsedMessage::Error(errno));
                if errno != 0 {
                    break;
                }
            }
            msg_type if msg_type >= GENL_ID_CTRL => {
                let genl = GenlMsgHdr::from_bytes(body)
                    .ok_or(MessageError::MissingGenlHeader { offset })?;
                messages.push(ParsedMessage::Generic(GenlMessage {
                    header,
                    genl,
                    payload: &body[GenlMsgHdr::SIZE..],
                }));
            }
            other => messages.push(ParsedMessage::Other(other)),
        }

        offset += nlmsg_align(msg_len);
        if offset >= data.len() {
            break;
        }
    }

    Ok(messages)
}

/// Extract the errno from an `NLMSG_ERROR` body
///
/// The kernel stores it negated (`-ENOENT`); this returns it positive.
#[must_use]
pub fn parse_error_message(body: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = body.get(..4)?.try_into().ok()?;
    Some(i32::from_ne_bytes(bytes).wrapping_neg())
}

// ============================================================================
// TESTS
// ============================================================================
