//! Station records from `NL80211_CMD_GET_STATION` dumps
//!
//! Each reply message describes one peer (an associated client on an AP
//! interface, or the AP itself on a managed interface). The interesting data
//! lives in the nested `NL80211_ATTR_STA_INFO` block, which itself nests
//! rate info, BSS parameters, chain signals and per-TID counters:
//!
//! ```text
//! NL80211_ATTR_IFINDEX   u32
//! NL80211_ATTR_MAC       [u8; 6]
//! NL80211_ATTR_STA_INFO
//! ├── RX_BYTES / RX_BYTES64, TX_*, SIGNAL, ...
//! ├── TX_BITRATE ── BITRATE / BITRATE32, MCS, width flags, SHORT_GI
//! ├── RX_BITRATE ── (same layout)
//! ├── BSS_PARAM  ── DTIM_PERIOD, BEACON_INTERVAL, CTS/preamble/slot flags
//! ├── CHAIN_SIGNAL ── [i8; n]
//! ├── STA_FLAGS  ── struct nl80211_sta_flag_update { mask, set }
//! └── TID_STATS  ── tid+1 → { RX_MSDU, TX_MSDU, TX_MSDU_RETRIES, TX_MSDU_FAILED }
//! ```
//!
//! Counters that exist in both 32-bit and 64-bit form are reported from the
//! 64-bit attribute when the kernel sends it.

use std::fmt;

use crate::netlink::attributes::{AttrKind, AttrValue, AttributeSet, Policy, RecordError, decode};
use crate::netlink::structures::*;

// ============================================================================
// ATTRIBUTE POLICIES
// ============================================================================

static RATE_INFO_POLICY: [(u16, AttrKind); 12] = [
    (NL80211_RATE_INFO_BITRATE, AttrKind::U16),
    (NL80211_RATE_INFO_MCS, AttrKind::U8),
    (NL80211_RATE_INFO_40_MHZ_WIDTH, AttrKind::Flag),
    (NL80211_RATE_INFO_SHORT_GI, AttrKind::Flag),
    (NL80211_RATE_INFO_BITRATE32, AttrKind::U32),
    (NL80211_RATE_INFO_VHT_MCS, AttrKind::U8),
    (NL80211_RATE_INFO_VHT_NSS, AttrKind::U8),
    (NL80211_RATE_INFO_80_MHZ_WIDTH, AttrKind::Flag),
    (NL80211_RATE_INFO_80P80_MHZ_WIDTH, AttrKind::Flag),
    (NL80211_RATE_INFO_160_MHZ_WIDTH, AttrKind::Flag),
    (NL80211_RATE_INFO_HE_MCS, AttrKind::U8),
    (NL80211_RATE_INFO_HE_NSS, AttrKind::U8),
];

static BSS_PARAM_POLICY: [(u16, AttrKind); 5] = [
    (NL80211_STA_BSS_PARAM_CTS_PROT, AttrKind::Flag),
    (NL80211_STA_BSS_PARAM_SHORT_PREAMBLE, AttrKind::Flag),
    (NL80211_STA_BSS_PARAM_SHORT_SLOT_TIME, AttrKind::Flag),
    (NL80211_STA_BSS_PARAM_DTIM_PERIOD, AttrKind::U8),
    (NL80211_STA_BSS_PARAM_BEACON_INTERVAL, AttrKind::U16),
];

static TID_STATS_POLICY: [(u16, AttrKind); 4] = [
    (NL80211_TID_STATS_RX_MSDU, AttrKind::U64),
    (NL80211_TID_STATS_TX_MSDU, AttrKind::U64),
    (NL80211_TID_STATS_TX_MSDU_RETRIES, AttrKind::U64),
    (NL80211_TID_STATS_TX_MSDU_FAILED, AttrKind::U64),
];

static TID_STATS_ENTRY: AttrKind = AttrKind::Nested(&TID_STATS_POLICY);
static CHAIN_SIGNAL_ENTRY: AttrKind = AttrKind::U8;

static STA_INFO_POLICY: [(u16, AttrKind); 36] = [
    (NL80211_STA_INFO_INACTIVE_TIME, AttrKind::U32),
    (NL80211_STA_INFO_RX_BYTES, AttrKind::U32),
    (NL80211_STA_INFO_TX_BYTES, AttrKind::U32),
    (NL80211_STA_INFO_LLID, AttrKind::U16),
    (NL80211_STA_INFO_PLID, AttrKind::U16),
    (NL80211_STA_INFO_PLINK_STATE, AttrKind::U8),
    (NL80211_STA_INFO_SIGNAL, AttrKind::U8),
    (NL80211_STA_INFO_TX_BITRATE, AttrKind::Nested(&RATE_INFO_POLICY)),
    (NL80211_STA_INFO_RX_PACKETS, AttrKind::U32),
    (NL80211_STA_INFO_TX_PACKETS, AttrKind::U32),
    (NL80211_STA_INFO_TX_RETRIES, AttrKind::U32),
    (NL80211_STA_INFO_TX_FAILED, AttrKind::U32),
    (NL80211_STA_INFO_SIGNAL_AVG, AttrKind::U8),
    (NL80211_STA_INFO_RX_BITRATE, AttrKind::Nested(&RATE_INFO_POLICY)),
    (NL80211_STA_INFO_BSS_PARAM, AttrKind::Nested(&BSS_PARAM_POLICY)),
    (NL80211_STA_INFO_CONNECTED_TIME, AttrKind::U32),
    (NL80211_STA_INFO_STA_FLAGS, AttrKind::MinLen(STA_FLAG_UPDATE_LEN)),
    (NL80211_STA_INFO_BEACON_LOSS, AttrKind::U32),
    (NL80211_STA_INFO_T_OFFSET, AttrKind::U64),
    (NL80211_STA_INFO_LOCAL_PM, AttrKind::U32),
    (NL80211_STA_INFO_PEER_PM, AttrKind::U32),
    (NL80211_STA_INFO_NONPEER_PM, AttrKind::U32),
    (NL80211_STA_INFO_RX_BYTES64, AttrKind::U64),
    (NL80211_STA_INFO_TX_BYTES64, AttrKind::U64),
    (NL80211_STA_INFO_CHAIN_SIGNAL, AttrKind::NestedArray(&CHAIN_SIGNAL_ENTRY)),
    (NL80211_STA_INFO_CHAIN_SIGNAL_AVG, AttrKind::NestedArray(&CHAIN_SIGNAL_ENTRY)),
    (NL80211_STA_INFO_EXPECTED_THROUGHPUT, AttrKind::U32),
    (NL80211_STA_INFO_RX_DROP_MISC, AttrKind::U64),
    (NL80211_STA_INFO_BEACON_RX, AttrKind::U64),
    (NL80211_STA_INFO_BEACON_SIGNAL_AVG, AttrKind::U8),
    (NL80211_STA_INFO_TID_STATS, AttrKind::NestedArray(&TID_STATS_ENTRY)),
    (NL80211_STA_INFO_RX_DURATION, AttrKind::U64),
    (NL80211_STA_INFO_ACK_SIGNAL, AttrKind::U8),
    (NL80211_STA_INFO_RX_MPDUS, AttrKind::U32),
    (NL80211_STA_INFO_FCS_ERROR_COUNT, AttrKind::U32),
    (NL80211_STA_INFO_TX_DURATION, AttrKind::U64),
];

static STATION_MESSAGE_POLICY: [(u16, AttrKind); 4] = [
    (NL80211_ATTR_IFINDEX, AttrKind::U32),
    (NL80211_ATTR_MAC, AttrKind::Fixed(ETH_ALEN)),
    (NL80211_ATTR_GENERATION, AttrKind::U32),
    (NL80211_ATTR_STA_INFO, AttrKind::Nested(&STA_INFO_POLICY)),
];

/// Policy for the top level of a `NEW_STATION` message
#[must_use]
pub fn station_message_policy() -> &'static Policy {
    &STATION_MESSAGE_POLICY
}

// ============================================================================
// RECORD TYPES
// ============================================================================

/// IEEE 802 hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

/// Lowercase colon-separated hex, e.g. `02:11:22:aa:bb:cc`
impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Channel width class of a bitrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelWidth {
    #[default]
    Mhz20,
    Mhz40,
    Mhz80,
    Mhz80P80,
    Mhz160,
}

impl ChannelWidth {
    /// Width in MHz; 80+80 counts as 160
    #[must_use]
    pub const fn mhz(self) -> u32 {
        match self {
            ChannelWidth::Mhz20 => 20,
            ChannelWidth::Mhz40 => 40,
            ChannelWidth::Mhz80 => 80,
            ChannelWidth::Mhz80P80 | ChannelWidth::Mhz160 => 160,
        }
    }

    fn from_rate_info(rate: &AttributeSet) -> Self {
        if rate.flag(NL80211_RATE_INFO_160_MHZ_WIDTH) {
            ChannelWidth::Mhz160
        } else if rate.flag(NL80211_RATE_INFO_80P80_MHZ_WIDTH) {
            ChannelWidth::Mhz80P80
        } else if rate.flag(NL80211_RATE_INFO_80_MHZ_WIDTH) {
            ChannelWidth::Mhz80
        } else if rate.flag(NL80211_RATE_INFO_40_MHZ_WIDTH) {
            ChannelWidth::Mhz40
        } else {
            ChannelWidth::Mhz20
        }
    }
}

/// Decoded `nl80211_rate_info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateInfo {
    /// Units of 100 kbit/s
    pub bitrate: Option<u32>,
    pub mcs: Option<u8>,
    pub vht_mcs: Option<u8>,
    pub vht_nss: Option<u8>,
    pub he_mcs: Option<u8>,
    pub he_nss: Option<u8>,
    pub width: ChannelWidth,
    pub short_gi: bool,
}

impl RateInfo {
    fn from_attributes(rate: &AttributeSet) -> Self {
        Self {
            bitrate: rate
                .u32(NL80211_RATE_INFO_BITRATE32)
                .or_else(|| rate.u16(NL80211_RATE_INFO_BITRATE).map(u32::from)),
            mcs: rate.u8(NL80211_RATE_INFO_MCS),
            vht_mcs: rate.u8(NL80211_RATE_INFO_VHT_MCS),
            vht_nss: rate.u8(NL80211_RATE_INFO_VHT_NSS),
            he_mcs: rate.u8(NL80211_RATE_INFO_HE_MCS),
            he_nss: rate.u8(NL80211_RATE_INFO_HE_NSS),
            width: ChannelWidth::from_rate_info(rate),
            short_gi: rate.flag(NL80211_RATE_INFO_SHORT_GI),
        }
    }

    /// Bitrate in bits per second
    #[must_use]
    pub fn bitrate_bps(&self) -> Option<u64> {
        self.bitrate.map(|rate| u64::from(rate) * 100_000)
    }

    /// Spatial stream count (HE preferred over VHT)
    #[must_use]
    pub fn spatial_streams(&self) -> Option<u8> {
        self.he_nss.or(self.vht_nss)
    }
}

/// `struct nl80211_sta_flag_update`
///
/// A flag's value is only meaningful when its bit is set in `mask`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationFlags {
    pub mask: u32,
    pub set: u32,
}

impl StationFlags {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < STA_FLAG_UPDATE_LEN {
            return None;
        }
        Some(Self {
            mask: read_u32(bytes, 0),
            set: read_u32(bytes, 4),
        })
    }

    /// Value of one `NL80211_STA_FLAG_*`, or `None` when the kernel left it out
    #[must_use]
    pub fn get(&self, flag: u32) -> Option<bool> {
        let bit = 1u32.checked_shl(flag)?;
        (self.mask & bit != 0).then_some(self.set & bit != 0)
    }
}

/// BSS parameters seen by a station
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BssParam {
    pub cts_protection: bool,
    pub short_preamble: bool,
    pub short_slot_time: bool,
    pub dtim_period: Option<u8>,
    pub beacon_interval: Option<u16>,
}

impl BssParam {
    fn from_attributes(bss: &AttributeSet) -> Self {
        Self {
            cts_protection: bss.flag(NL80211_STA_BSS_PARAM_CTS_PROT),
            short_preamble: bss.flag(NL80211_STA_BSS_PARAM_SHORT_PREAMBLE),
            short_slot_time: bss.flag(NL80211_STA_BSS_PARAM_SHORT_SLOT_TIME),
            dtim_period: bss.u8(NL80211_STA_BSS_PARAM_DTIM_PERIOD),
            beacon_interval: bss.u16(NL80211_STA_BSS_PARAM_BEACON_INTERVAL),
        }
    }
}

/// MSDU counters for one traffic identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TidStats {
    /// 0-15 for QoS TIDs, 16 for non-QoS traffic
    pub tid: u16,
    pub rx_msdu: Option<u64>,
    pub tx_msdu: Option<u64>,
    pub tx_msdu_retries: Option<u64>,
    pub tx_msdu_failed: Option<u64>,
}

/// Contents of `NL80211_ATTR_STA_INFO`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationInfo {
    pub inactive_time_ms: Option<u32>,
    pub connected_time_s: Option<u32>,

    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub rx_packets: Option<u32>,
    pub tx_packets: Option<u32>,
    pub tx_retries: Option<u32>,
    pub tx_failed: Option<u32>,
    pub rx_drop_misc: Option<u64>,
    pub rx_mpdus: Option<u32>,
    pub fcs_error_count: Option<u32>,
    pub beacon_loss: Option<u32>,
    pub beacon_rx: Option<u64>,

    pub signal_dbm: Option<i8>,
    pub signal_avg_dbm: Option<i8>,
    pub beacon_signal_avg_dbm: Option<i8>,
    pub ack_signal_dbm: Option<i8>,
    pub chain_signal_dbm: Vec<i8>,
    pub chain_signal_avg_dbm: Vec<i8>,

    pub t_offset_us: Option<u64>,
    pub rx_duration_us: Option<u64>,
    pub tx_duration_us: Option<u64>,
    pub expected_throughput_kbps: Option<u32>,

    pub llid: Option<u16>,
    pub plid: Option<u16>,
    pub plink_state: Option<u8>,
    pub local_pm: Option<u32>,
    pub peer_pm: Option<u32>,
    pub nonpeer_pm: Option<u32>,

    pub tx_bitrate: Option<RateInfo>,
    pub rx_bitrate: Option<RateInfo>,
    pub flags: Option<StationFlags>,
    pub bss_param: Option<BssParam>,
    pub tid_stats: Vec<TidStats>,
}

impl StationInfo {
    fn from_attributes(info: &AttributeSet) -> Self {
        Self {
            inactive_time_ms: info.u32(NL80211_STA_INFO_INACTIVE_TIME),
            connected_time_s: info.u32(NL80211_STA_INFO_CONNECTED_TIME),

            rx_bytes: info
                .u64(NL80211_STA_INFO_RX_BYTES64)
                .or_else(|| info.u32(NL80211_STA_INFO_RX_BYTES).map(u64::from)),
            tx_bytes: info
                .u64(NL80211_STA_INFO_TX_BYTES64)
                .or_else(|| info.u32(NL80211_STA_INFO_TX_BYTES).map(u64::from)),
            rx_packets: info.u32(NL80211_STA_INFO_RX_PACKETS),
            tx_packets: info.u32(NL80211_STA_INFO_TX_PACKETS),
            tx_retries: info.u32(NL80211_STA_INFO_TX_RETRIES),
            tx_failed: info.u32(NL80211_STA_INFO_TX_FAILED),
            rx_drop_misc: info.u64(NL80211_STA_INFO_RX_DROP_MISC),
            rx_mpdus: info.u32(NL80211_STA_INFO_RX_MPDUS),
            fcs_error_count: info.u32(NL80211_STA_INFO_FCS_ERROR_COUNT),
            beacon_loss: info.u32(NL80211_STA_INFO_BEACON_LOSS),
            beacon_rx: info.u64(NL80211_STA_INFO_BEACON_RX),

            signal_dbm: info.i8(NL80211_STA_INFO_SIGNAL),
            signal_avg_dbm: info.i8(NL80211_STA_INFO_SIGNAL_AVG),
            beacon_signal_avg_dbm: info.i8(NL80211_STA_INFO_BEACON_SIGNAL_AVG),
            ack_signal_dbm: info.i8(NL80211_STA_INFO_ACK_SIGNAL),
            chain_signal_dbm: chain_signals(info, NL80211_STA_INFO_CHAIN_SIGNAL),
            chain_signal_avg_dbm: chain_signals(info, NL80211_STA_INFO_CHAIN_SIGNAL_AVG),

            t_offset_us: info.u64(NL80211_STA_INFO_T_OFFSET),
            rx_duration_us: info.u64(NL80211_STA_INFO_RX_DURATION),
            tx_duration_us: info.u64(NL80211_STA_INFO_TX_DURATION),
            expected_throughput_kbps: info.u32(NL80211_STA_INFO_EXPECTED_THROUGHPUT),

            llid: info.u16(NL80211_STA_INFO_LLID),
            plid: info.u16(NL80211_STA_INFO_PLID),
            plink_state: info.u8(NL80211_STA_INFO_PLINK_STATE),
            local_pm: info.u32(NL80211_STA_INFO_LOCAL_PM),
            peer_pm: info.u32(NL80211_STA_INFO_PEER_PM),
            nonpeer_pm: info.u32(NL80211_STA_INFO_NONPEER_PM),

            tx_bitrate: info
                .nested(NL80211_STA_INFO_TX_BITRATE)
                .map(RateInfo::from_attributes),
            rx_bitrate: info
                .nested(NL80211_STA_INFO_RX_BITRATE)
                .map(RateInfo::from_attributes),
            flags: info
                .bytes(NL80211_STA_INFO_STA_FLAGS)
                .and_then(StationFlags::from_bytes),
            bss_param: info
                .nested(NL80211_STA_INFO_BSS_PARAM)
                .map(BssParam::from_attributes),
            tid_stats: tid_stats(info),
        }
    }
}

fn chain_signals(info: &AttributeSet, id: u16) -> Vec<i8> {
    info.array(id)
        .unwrap_or_default()
        .iter()
        .filter_map(|(_, value)| match value {
            AttrValue::U8(raw) => Some(*raw as i8),
            _ => None,
        })
        .collect()
}

fn tid_stats(info: &AttributeSet) -> Vec<TidStats> {
    info.array(NL80211_STA_INFO_TID_STATS)
        .unwrap_or_default()
        .iter()
        .filter_map(|(index, value)| match value {
            // Entry types are tid + 1
            AttrValue::Nested(entry) if *index > 0 => Some(TidStats {
                tid: index - 1,
                rx_msdu: entry.u64(NL80211_TID_STATS_RX_MSDU),
                tx_msdu: entry.u64(NL80211_TID_STATS_TX_MSDU),
                tx_msdu_retries: entry.u64(NL80211_TID_STATS_TX_MSDU_RETRIES),
                tx_msdu_failed: entry.u64(NL80211_TID_STATS_TX_MSDU_FAILED),
            }),
            _ => None,
        })
        .collect()
}

/// One station as reported for one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRecord {
    pub ifindex: u32,
    pub mac: MacAddr,
    pub info: StationInfo,
}

/// Decode the attribute payload of one `NEW_STATION` message
///
/// # Errors
///
/// `MissingMandatoryField` when ifindex, MAC or the `STA_INFO` block is
/// absent; `MalformedAttributes` when any level violates its policy.
pub fn decode_station_message(payload: &[u8]) -> Result<StationRecord, RecordError> {
    let attrs = decode(payload, &STATION_MESSAGE_POLICY)?;

    let ifindex = attrs
        .u32(NL80211_ATTR_IFINDEX)
        .ok_or(RecordError::MissingMandatoryField("ifindex"))?;
    let mac = attrs
        .bytes(NL80211_ATTR_MAC)
        .and_then(MacAddr::from_slice)
        .ok_or(RecordError::MissingMandatoryField("mac"))?;
    let info = attrs
        .nested(NL80211_ATTR_STA_INFO)
        .ok_or(RecordError::MissingMandatoryField("sta_info"))?;

    Ok(StationRecord {
        ifindex,
        mac,
        info: StationInfo::from_attributes(info),
    })
}

// ============================================================================
// TESTS
// ============================================================================
