//! Binary structures and constants for generic netlink and `nl80211`
//!
//! Headers use `#[repr(C)]` to match kernel layout exactly and are read and
//! written in host byte order, as netlink requires.

// NETLINK MESSAGE HEADER

/// Netlink message header (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Read a header from the start of `data`, if there is room for one.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            nlmsg_len: read_u32(data, 0),
            nlmsg_type: read_u16(data, 4),
            nlmsg_flags: read_u16(data, 6),
            nlmsg_seq: read_u32(data, 8),
            nlmsg_pid: read_u32(data, 12),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.nlmsg_len.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_type.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_flags.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_seq.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_pid.to_ne_bytes());
    }
}

// GENERIC NETLINK HEADER

/// Generic netlink header (4 bytes), follows `NlMsgHdr`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlMsgHdr {
    pub cmd: u8,
    pub version: u8,
    pub reserved: u16,
}

impl GenlMsgHdr {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            cmd: data[0],
            version: data[1],
            reserved: read_u16(data, 2),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.cmd);
        buf.push(self.version);
        buf.extend_from_slice(&self.reserved.to_ne_bytes());
    }
}

// ATTRIBUTE HEADER

/// Netlink attribute header (4 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlAttr {
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttr {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            nla_len: read_u16(data, 0),
            nla_type: read_u16(data, 2),
        })
    }

    /// Attribute type with the nested / byte-order flag bits stripped
    #[must_use]
    pub const fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }
}

// CONSTANTS

// Netlink message types
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;

// Netlink flags
pub const NLM_F_REQUEST: u16 = 1;
pub const NLM_F_MULTI: u16 = 2;
pub const NLM_F_ACK: u16 = 4;
pub const NLM_F_DUMP_INTR: u16 = 16;

// Request flags
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Attribute type flags
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// Generic netlink controller
pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_VERSION: u8 = 1;
pub const CTRL_CMD_NEWFAMILY: u8 = 1;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;

pub const NL80211_FAMILY_NAME: &str = "nl80211";
pub const NL80211_VERSION: u8 = 0;

// nl80211 commands
pub const NL80211_CMD_GET_INTERFACE: u8 = 5;
pub const NL80211_CMD_NEW_INTERFACE: u8 = 7;
pub const NL80211_CMD_GET_STATION: u8 = 17;
pub const NL80211_CMD_NEW_STATION: u8 = 19;
pub const NL80211_CMD_GET_SURVEY: u8 = 50;
pub const NL80211_CMD_NEW_SURVEY_RESULTS: u8 = 51;

// nl80211 top-level attributes
pub const NL80211_ATTR_WIPHY: u16 = 1;
pub const NL80211_ATTR_IFINDEX: u16 = 3;
pub const NL80211_ATTR_IFNAME: u16 = 4;
pub const NL80211_ATTR_IFTYPE: u16 = 5;
pub const NL80211_ATTR_MAC: u16 = 6;
pub const NL80211_ATTR_STA_INFO: u16 = 21;
pub const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
pub const NL80211_ATTR_GENERATION: u16 = 46;
pub const NL80211_ATTR_SURVEY_INFO: u16 = 84;
pub const NL80211_ATTR_WIPHY_TX_POWER_LEVEL: u16 = 98;
pub const NL80211_ATTR_CHANNEL_WIDTH: u16 = 159;

// nl80211_sta_info
pub const NL80211_STA_INFO_INACTIVE_TIME: u16 = 1;
pub const NL80211_STA_INFO_RX_BYTES: u16 = 2;
pub const NL80211_STA_INFO_TX_BYTES: u16 = 3;
pub const NL80211_STA_INFO_LLID: u16 = 4;
pub const NL80211_STA_INFO_PLID: u16 = 5;
pub const NL80211_STA_INFO_PLINK_STATE: u16 = 6;
pub const NL80211_STA_INFO_SIGNAL: u16 = 7;
pub const NL80211_STA_INFO_TX_BITRATE: u16 = 8;
pub const NL80211_STA_INFO_RX_PACKETS: u16 = 9;
pub const NL80211_STA_INFO_TX_PACKETS: u16 = 10;
pub const NL80211_STA_INFO_TX_RETRIES: u16 = 11;
pub const NL80211_STA_INFO_TX_FAILED: u16 = 12;
pub const NL80211_STA_INFO_SIGNAL_AVG: u16 = 13;
pub const NL80211_STA_INFO_RX_BITRATE: u16 = 14;
pub const NL80211_STA_INFO_BSS_PARAM: u16 = 15;
pub const NL80211_STA_INFO_CONNECTED_TIME: u16 = 16;
pub const NL80211_STA_INFO_STA_FLAGS: u16 = 17;
pub const NL80211_STA_INFO_BEACON_LOSS: u16 = 18;
pub const NL80211_STA_INFO_T_OFFSET: u16 = 19;
pub const NL80211_STA_INFO_LOCAL_PM: u16 = 20;
pub const NL80211_STA_INFO_PEER_PM: u16 = 21;
pub const NL80211_STA_INFO_NONPEER_PM: u16 = 22;
pub const NL80211_STA_INFO_RX_BYTES64: u16 = 23;
pub const NL80211_STA_INFO_TX_BYTES64: u16 = 24;
pub const NL80211_STA_INFO_CHAIN_SIGNAL: u16 = 25;
pub const NL80211_STA_INFO_CHAIN_SIGNAL_AVG: u16 = 26;
pub const NL80211_STA_INFO_EXPECTED_THROUGHPUT: u16 = 27;
pub const NL80211_STA_INFO_RX_DROP_MISC: u16 = 28;
pub const NL80211_STA_INFO_BEACON_RX: u16 = 29;
pub const NL80211_STA_INFO_BEACON_SIGNAL_AVG: u16 = 30;
pub const NL80211_STA_INFO_TID_STATS: u16 = 31;
pub const NL80211_STA_INFO_RX_DURATION: u16 = 32;
pub const NL80211_STA_INFO_ACK_SIGNAL: u16 = 34;
pub const NL80211_STA_INFO_RX_MPDUS: u16 = 36;
pub const NL80211_STA_INFO_FCS_ERROR_COUNT: u16 = 37;
pub const NL80211_STA_INFO_TX_DURATION: u16 = 39;

// nl80211_rate_info
pub const NL80211_RATE_INFO_BITRATE: u16 = 1;
pub const NL80211_RATE_INFO_MCS: u16 = 2;
pub const NL80211_RATE_INFO_40_MHZ_WIDTH: u16 = 3;
pub const NL80211_RATE_INFO_SHORT_GI: u16 = 4;
pub const NL80211_RATE_INFO_BITRATE32: u16 = 5;
pub const NL80211_RATE_INFO_VHT_MCS: u16 = 6;
pub const NL80211_RATE_INFO_VHT_NSS: u16 = 7;
pub const NL80211_RATE_INFO_80_MHZ_WIDTH: u16 = 8;
pub const NL80211_RATE_INFO_80P80_MHZ_WIDTH: u16 = 9;
pub const NL80211_RATE_INFO_160_MHZ_WIDTH: u16 = 10;
pub const NL80211_RATE_INFO_HE_MCS: u16 = 13;
pub const NL80211_RATE_INFO_HE_NSS: u16 = 14;

// nl80211_sta_bss_param
pub const NL80211_STA_BSS_PARAM_CTS_PROT: u16 = 1;
pub const NL80211_STA_BSS_PARAM_SHORT_PREAMBLE: u16 = 2;
pub const NL80211_STA_BSS_PARAM_SHORT_SLOT_TIME: u16 = 3;
pub const NL80211_STA_BSS_PARAM_DTIM_PERIOD: u16 = 4;
pub const NL80211_STA_BSS_PARAM_BEACON_INTERVAL: u16 = 5;

// nl80211_tid_stats
pub const NL80211_TID_STATS_RX_MSDU: u16 = 1;
pub const NL80211_TID_STATS_TX_MSDU: u16 = 2;
pub const NL80211_TID_STATS_TX_MSDU_RETRIES: u16 = 3;
pub const NL80211_TID_STATS_TX_MSDU_FAILED: u16 = 4;

// nl80211_sta_flags (bit positions in nl80211_sta_flag_update)
pub const NL80211_STA_FLAG_AUTHORIZED: u32 = 1;
pub const NL80211_STA_FLAG_SHORT_PREAMBLE: u32 = 2;
pub const NL80211_STA_FLAG_WME: u32 = 3;
pub const NL80211_STA_FLAG_MFP: u32 = 4;
pub const NL80211_STA_FLAG_AUTHENTICATED: u32 = 5;
pub const NL80211_STA_FLAG_TDLS_PEER: u32 = 6;
pub const NL80211_STA_FLAG_ASSOCIATED: u32 = 7;

// nl80211_survey_info
pub const NL80211_SURVEY_INFO_FREQUENCY: u16 = 1;
pub const NL80211_SURVEY_INFO_NOISE: u16 = 2;
pub const NL80211_SURVEY_INFO_IN_USE: u16 = 3;
pub const NL80211_SURVEY_INFO_TIME: u16 = 4;
pub const NL80211_SURVEY_INFO_TIME_BUSY: u16 = 5;
pub const NL80211_SURVEY_INFO_TIME_EXT_BUSY: u16 = 6;
pub const NL80211_SURVEY_INFO_TIME_RX: u16 = 7;
pub const NL80211_SURVEY_INFO_TIME_TX: u16 = 8;
pub const NL80211_SURVEY_INFO_TIME_SCAN: u16 = 9;
pub const NL80211_SURVEY_INFO_TIME_BSS_RX: u16 = 11;

/// Size of `struct nl80211_sta_flag_update` (mask + set)
pub const STA_FLAG_UPDATE_LEN: usize = 8;

/// Hardware address length
pub const ETH_ALEN: usize = 6;

// HELPER FUNCTIONS

/// Align length to 4-byte boundary
#[must_use]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Calculate Netlink message length
#[must_use]
pub const fn nlmsg_length(payload_len: usize) -> u32 {
    (NlMsgHdr::SIZE + payload_len) as u32
}

/// Align attribute length to 4-byte boundary
#[must_use]
pub const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Calculate attribute length
#[must_use]
pub const fn nla_length(payload_len: usize) -> u16 {
    (NlAttr::SIZE + payload_len) as u16
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

// TESTS

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(NlMsgHdr::SIZE, 16);
        assert_eq!(GenlMsgHdr::SIZE, 4);
        assert_eq!(NlAttr::SIZE, 4);
    }

    #[test]
    fn test_alignment() {
        assert_eq!(nlmsg_align(0), 0);
        assert_eq!(nlmsg_align(1), 4);
        assert_eq!(nlmsg_align(4), 4);
        assert_eq!(nlmsg_align(5), 8);
        assert_eq!(nla_align(7), 8);
        assert_eq!(nla_align(8), 8);
    }

    #[test]
    fn test_header_round_trip_through_bytes() {
        let hdr = NlMsgHdr {
            nlmsg_len: 20,
            nlmsg_type: GENL_ID_CTRL,
            nlmsg_flags: NLM_F_REQUEST,
            nlmsg_seq: 7,
            nlmsg_pid: 0,
        };
        let mut buf = Vec::new();
        hdr.write_to(&mut buf);

        assert_eq!(buf.len(), NlMsgHdr::SIZE);
        assert_eq!(NlMsgHdr::from_bytes(&buf), Some(hdr));
        assert_eq!(NlMsgHdr::from_bytes(&buf[..15]), None);
    }

    #[test]
    fn test_attr_kind_strips_flag_bits() {
        let attr = NlAttr {
            nla_len: 8,
            nla_type: NL80211_STA_INFO_TID_STATS | NLA_F_NESTED,
        };
        assert_eq!(attr.kind(), NL80211_STA_INFO_TID_STATS);
    }
}
