//! Interface records from `NL80211_CMD_GET_INTERFACE` dumps

use std::ffi::CStr;

use crate::netlink::attributes::{AttrKind, RecordError, decode};
use crate::netlink::station_info::MacAddr;
use crate::netlink::structures::*;

static INTERFACE_MESSAGE_POLICY: [(u16, AttrKind); 9] = [
    (NL80211_ATTR_WIPHY, AttrKind::U32),
    (NL80211_ATTR_IFINDEX, AttrKind::U32),
    (NL80211_ATTR_IFNAME, AttrKind::String),
    (NL80211_ATTR_IFTYPE, AttrKind::U32),
    (NL80211_ATTR_MAC, AttrKind::Fixed(ETH_ALEN)),
    (NL80211_ATTR_GENERATION, AttrKind::U32),
    (NL80211_ATTR_WIPHY_FREQ, AttrKind::U32),
    (NL80211_ATTR_WIPHY_TX_POWER_LEVEL, AttrKind::U32),
    (NL80211_ATTR_CHANNEL_WIDTH, AttrKind::U32),
];

/// One wireless network interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub ifindex: u32,
    /// Absent for interfaces without a netdev; resolved later by index
    pub name: Option<String>,
    pub wiphy: Option<u32>,
    /// `enum nl80211_iftype`
    pub iftype: Option<u32>,
    pub mac: Option<MacAddr>,
    pub frequency_mhz: Option<u32>,
    /// `enum nl80211_chan_width`
    pub channel_width: Option<u32>,
    /// mBm (1/100 dBm)
    pub tx_power_mbm: Option<u32>,
}

impl InterfaceRecord {
    /// Operating channel width in MHz
    #[must_use]
    pub fn channel_width_mhz(&self) -> Option<u32> {
        match self.channel_width? {
            0 | 1 => Some(20),
            2 => Some(40),
            3 => Some(80),
            // 80+80 is reported as 160
            4 | 5 => Some(160),
            6 => Some(5),
            7 => Some(10),
            _ => None,
        }
    }
}

/// Decode the attribute payload of one `NEW_INTERFACE` message
///
/// # Errors
///
/// `MissingMandatoryField` without an ifindex; `MalformedAttributes` when an
/// attribute has the wrong width.
pub fn decode_interface_message(payload: &[u8]) -> Result<InterfaceRecord, RecordError> {
    let attrs = decode(payload, &INTERFACE_MESSAGE_POLICY)?;

    let ifindex = attrs
        .u32(NL80211_ATTR_IFINDEX)
        .ok_or(RecordError::MissingMandatoryField("ifindex"))?;

    Ok(InterfaceRecord {
        ifindex,
        name: attrs
            .str(NL80211_ATTR_IFNAME)
            .filter(|name| !name.is_empty())
            .map(str::to_owned),
        wiphy: attrs.u32(NL80211_ATTR_WIPHY),
        iftype: attrs.u32(NL80211_ATTR_IFTYPE),
        mac: attrs.bytes(NL80211_ATTR_MAC).and_then(MacAddr::from_slice),
        frequency_mhz: attrs.u32(NL80211_ATTR_WIPHY_FREQ),
        channel_width: attrs.u32(NL80211_ATTR_CHANNEL_WIDTH),
        tx_power_mbm: attrs.u32(NL80211_ATTR_WIPHY_TX_POWER_LEVEL),
    })
}

/// Look up an interface name by index with `if_indextoname(3)`
#[must_use]
pub fn resolve_device_name(ifindex: u32) -> Option<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    // SAFETY: buf holds IF_NAMESIZE bytes as if_indextoname requires.
    let ret = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr()) };
    if ret.is_null() {
        return None;
    }
    // SAFETY: on success the buffer holds a NUL-terminated name.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}
