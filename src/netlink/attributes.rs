//! Policy-driven netlink attribute decoding
//!
//! Netlink payloads are sequences of TLV attributes (`NlAttr` header +
//! payload + padding). Some attributes carry scalars, some carry another
//! attribute sequence (nested). The kernel publishes a policy for each
//! attribute space saying which kind every identifier holds. This module
//! walks a buffer against such a policy and returns typed values.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┬───────────────┬─────────┬──────────────┬─────
//! │ NlAttr (4 B) │ payload (N B) │ pad 0-3 │ NlAttr (4 B) │ ...
//! └──────────────┴───────────────┴─────────┴──────────────┴─────
//! ```
//!
//! `nla_len` counts header + payload but not padding.
//!
//! # Policies
//!
//! A [`Policy`] is a static table of `(identifier, AttrKind)` pairs. Nested
//! kinds point at another static policy, so the recursion depth is fixed by
//! the tables themselves and cannot be driven by the input.
//!
//! Identifiers missing from the policy are skipped. When an identifier
//! appears twice the last occurrence wins, as it does in the kernel's
//! `nla_parse()`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::netlink::structures::{NlAttr, nla_align};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Ways an attribute buffer can fail its policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// `nla_len` runs past the end of the enclosing buffer
    #[error("attribute {id} at offset {offset} claims {len} bytes, only {available} available")]
    Truncated {
        id: u16,
        offset: usize,
        len: usize,
        available: usize,
    },

    /// `nla_len` is smaller than the attribute header itself
    #[error("attribute at offset {offset} has invalid length {len}")]
    InvalidLength { offset: usize, len: usize },

    /// Payload width does not match the declared kind
    #[error("attribute {id} expected {expected}, got {actual} payload bytes")]
    WidthMismatch {
        id: u16,
        expected: &'static str,
        actual: usize,
    },
}

/// Why one dump record was dropped
///
/// Record errors never stop a dump: the record is skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed attributes: {0}")]
    MalformedAttributes(#[from] AttributeError),

    #[error("missing mandatory attribute {0}")]
    MissingMandatoryField(&'static str),
}

// ============================================================================
// POLICY
// ============================================================================

/// Declared kind of one attribute identifier
#[derive(Debug, Clone, Copy)]
pub enum AttrKind {
    U8,
    U16,
    U32,
    U64,
    /// Presence-only attribute with an empty payload
    Flag,
    /// NUL-terminated (or not) string
    String,
    /// Opaque bytes of exactly this length
    Fixed(usize),
    /// Opaque bytes of at least this length
    MinLen(usize),
    /// Nested attribute set decoded against another policy
    Nested(&'static Policy),
    /// Nested list whose entries all share one kind; identifiers are kept as
    /// list positions (chain index, TID number)
    NestedArray(&'static AttrKind),
}

impl AttrKind {
    fn describe(&self) -> &'static str {
        match self {
            AttrKind::U8 => "1 byte",
            AttrKind::U16 => "2 bytes",
            AttrKind::U32 => "4 bytes",
            AttrKind::U64 => "8 bytes",
            AttrKind::Flag => "an empty flag",
            AttrKind::String => "a string",
            AttrKind::Fixed(_) => "a fixed-width blob",
            AttrKind::MinLen(_) => "a minimum-width blob",
            AttrKind::Nested(_) | AttrKind::NestedArray(_) => "a nested block",
        }
    }
}

/// Static attribute policy: identifier → kind
pub type Policy = [(u16, AttrKind)];

fn lookup(policy: &Policy, id: u16) -> Option<&AttrKind> {
    policy
        .iter()
        .find_map(|(candidate, kind)| (*candidate == id).then_some(kind))
}

// ============================================================================
// DECODED VALUES
// ============================================================================

/// One decoded attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Flag,
    Str(String),
    Bytes(Vec<u8>),
    Nested(AttributeSet),
    Array(Vec<(u16, AttrValue)>),
}

/// Decoded attributes of one block, keyed by identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    entries: BTreeMap<u16, AttrValue>,
}

impl AttributeSet {
    #[must_use]
    pub fn get(&self, id: u16) -> Option<&AttrValue> {
        self.entries.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn u8(&self, id: u16) -> Option<u8> {
        match self.get(id)? {
            AttrValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    /// Single byte reinterpreted as two's complement (dBm values)
    #[must_use]
    pub fn i8(&self, id: u16) -> Option<i8> {
        self.u8(id).map(|v| v as i8)
    }

    #[must_use]
    pub fn u16(&self, id: u16) -> Option<u16> {
        match self.get(id)? {
            AttrValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn u32(&self, id: u16) -> Option<u32> {
        match self.get(id)? {
            AttrValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn u64(&self, id: u16) -> Option<u64> {
        match self.get(id)? {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn flag(&self, id: u16) -> bool {
        matches!(self.get(id), Some(AttrValue::Flag))
    }

    #[must_use]
    pub fn str(&self, id: u16) -> Option<&str> {
        match self.get(id)? {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes(&self, id: u16) -> Option<&[u8]> {
        match self.get(id)? {
            AttrValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn nested(&self, id: u16) -> Option<&AttributeSet> {
        match self.get(id)? {
            AttrValue::Nested(set) => Some(set),
            _ => None,
        }
    }

    #[must_use]
    pub fn array(&self, id: u16) -> Option<&[(u16, AttrValue)]> {
        match self.get(id)? {
            AttrValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

// ============================================================================
// RAW ITERATION
// ============================================================================

/// Iterator over raw `(type, payload)` pairs of an attribute buffer
///
/// Stops at the first structural error and yields it once.
pub struct RawAttributes<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RawAttributes<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for RawAttributes<'a> {
    type Item = Result<(u16, &'a [u8]), AttributeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let rest = &self.data[self.offset.min(self.data.len())..];
        let header = NlAttr::from_bytes(rest)?;
        let len = header.nla_len as usize;

        if len < NlAttr::SIZE {
            self.failed = true;
            return Some(Err(AttributeError::InvalidLength {
                offset: self.offset,
                len,
            }));
        }
        if len > rest.len() {
            self.failed = true;
            return Some(Err(AttributeError::Truncated {
                id: header.kind(),
                offset: self.offset,
                len,
                available: rest.len(),
            }));
        }

        let payload = &rest[NlAttr::SIZE..len];
        self.offset += nla_align(len);
        Some(Ok((header.kind(), payload)))
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode an attribute buffer against `policy`
///
/// # Errors
///
/// Returns `AttributeError` when the buffer is structurally broken or an
/// attribute listed in the policy has the wrong width. Callers treat this as
/// "skip this record".
pub fn decode(data: &[u8], policy: &Policy) -> Result<AttributeSet, AttributeError> {
    let mut set = AttributeSet::default();
    for item in RawAttributes::new(data) {
        let (id, payload) = item?;
        if let Some(kind) = lookup(policy, id) {
            let value = decode_value(id, payload, kind)?;
            set.entries.insert(id, value);
        }
    }
    Ok(set)
}

fn decode_value(id: u16, payload: &[u8], kind: &AttrKind) -> Result<AttrValue, AttributeError> {
    let mismatch = || AttributeError::WidthMismatch {
        id,
        expected: kind.describe(),
        actual: payload.len(),
    };

    let value = match kind {
        AttrKind::U8 => {
            let [b] = <[u8; 1]>::try_from(payload).map_err(|_| mismatch())?;
            AttrValue::U8(b)
        }
        AttrKind::U16 => {
            let bytes = <[u8; 2]>::try_from(payload).map_err(|_| mismatch())?;
            AttrValue::U16(u16::from_ne_bytes(bytes))
        }
        AttrKind::U32 => {
            let bytes = <[u8; 4]>::try_from(payload).map_err(|_| mismatch())?;
            AttrValue::U32(u32::from_ne_bytes(bytes))
        }
        AttrKind::U64 => {
            let bytes = <[u8; 8]>::try_from(payload).map_err(|_| mismatch())?;
            AttrValue::U64(u64::from_ne_bytes(bytes))
        }
        AttrKind::Flag => {
            if !payload.is_empty() {
                return Err(mismatch());
            }
            AttrValue::Flag
        }
        AttrKind::String => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            AttrValue::Str(String::from_utf8_lossy(&payload[..end]).into_owned())
        }
        AttrKind::Fixed(width) => {
            if payload.len() != *width {
                return Err(mismatch());
            }
            AttrValue::Bytes(payload.to_vec())
        }
        AttrKind::MinLen(width) => {
            if payload.len() < *width {
                return Err(mismatch());
            }
            AttrValue::Bytes(payload.to_vec())
        }
        AttrKind::Nested(inner) => AttrValue::Nested(decode(payload, inner)?),
        AttrKind::NestedArray(element) => {
            let mut items = Vec::new();
            for item in RawAttributes::new(payload) {
                let (index, element_payload) = item?;
                items.push((index, decode_value(index, element_payload, element)?));
            }
            AttrValue::Array(items)
        }
    };
    Ok(value)
}

// ============================================================================
// TESTS
// ============================================================================
