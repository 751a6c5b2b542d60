//! Text exposition of decoded `nl80211` records
//!
//! Pure functions from records to [`MetricLine`]s. Nothing here does I/O;
//! the collector writes the lines as they are produced.
//!
//! # Format
//!
//! ```text
//! wifi_station_signal_dbm{device="wlan0",station="02:11:22:aa:bb:cc"} -42
//! wifi_survey_noise_dbm{device="wlan0",frequency="5180"} -95
//! ```
//!
//! Labels always appear in the order `device`, `station`, `frequency`, then
//! `chain` or `tid`. A field the kernel did not report produces no line at
//! all. Flags are the exception: their parent block being present is enough
//! to report them as `0` or `1`.

use std::borrow::Cow;
use std::fmt;

use crate::netlink::structures::{
    NL80211_STA_FLAG_ASSOCIATED, NL80211_STA_FLAG_AUTHENTICATED, NL80211_STA_FLAG_AUTHORIZED,
    NL80211_STA_FLAG_MFP, NL80211_STA_FLAG_SHORT_PREAMBLE, NL80211_STA_FLAG_TDLS_PEER,
    NL80211_STA_FLAG_WME,
};
use crate::netlink::{InterfaceRecord, RateInfo, StationRecord, SurveyRecord};

// ============================================================================
// METRIC LINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    Unsigned(u64),
    Signed(i64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Unsigned(v) => write!(f, "{v}"),
            MetricValue::Signed(v) => write!(f, "{v}"),
        }
    }
}

/// One exposition line: `name{labels} value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLine {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: MetricValue,
}

impl MetricLine {
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|(k, v)| (*k == key).then_some(v.as_str()))
    }
}

/// Renders without the trailing newline
impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        if !self.labels.is_empty() {
            f.write_str("{")?;
            for (i, (key, value)) in self.labels.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}=\"{}\"", escape_label_value(value))?;
            }
            f.write_str("}")?;
        }
        write!(f, " {}", self.value)
    }
}

/// Escape `\`, `"` and newline in a label value
#[must_use]
pub fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

// ============================================================================
// LINE BUILDER
// ============================================================================

struct Lines {
    base: Vec<(&'static str, String)>,
    out: Vec<MetricLine>,
}

impl Lines {
    fn new(base: Vec<(&'static str, String)>) -> Self {
        Self {
            base,
            out: Vec::new(),
        }
    }

    fn push(&mut self, name: &'static str, extra: Option<(&'static str, String)>, value: MetricValue) {
        let mut labels = self.base.clone();
        labels.extend(extra);
        self.out.push(MetricLine {
            name,
            labels,
            value,
        });
    }

    fn unsigned<T: Into<u64>>(&mut self, name: &'static str, value: Option<T>) {
        if let Some(v) = value {
            self.push(name, None, MetricValue::Unsigned(v.into()));
        }
    }

    fn signed<T: Into<i64>>(&mut self, name: &'static str, value: Option<T>) {
        if let Some(v) = value {
            self.push(name, None, MetricValue::Signed(v.into()));
        }
    }

    fn flag(&mut self, name: &'static str, value: bool) {
        self.push(name, None, MetricValue::Unsigned(u64::from(value)));
    }

    fn finish(self) -> Vec<MetricLine> {
        self.out
    }
}

// ============================================================================
// INTERFACES
// ============================================================================

/// Lines for one interface, labelled with its device name
#[must_use]
pub fn format_interface(device: &str, iface: &InterfaceRecord) -> Vec<MetricLine> {
    let mut lines = Lines::new(vec![("device", device.to_owned())]);
    lines.unsigned("wifi_interface_index", Some(iface.ifindex));
    lines.unsigned("wifi_interface_wiphy", iface.wiphy);
    lines.unsigned("wifi_interface_type", iface.iftype);
    lines.unsigned("wifi_interface_frequency_mhz", iface.frequency_mhz);
    lines.unsigned("wifi_interface_channel_width_mhz", iface.channel_width_mhz());
    lines.unsigned("wifi_interface_tx_power_mbm", iface.tx_power_mbm);
    lines.finish()
}

// ============================================================================
// STATIONS
// ============================================================================

struct RateNames {
    bitrate: &'static str,
    width: &'static str,
    streams: &'static str,
    mcs: &'static str,
    vht_mcs: &'static str,
    he_mcs: &'static str,
    short_gi: &'static str,
}

const TX_RATE: RateNames = RateNames {
    bitrate: "wifi_station_transmit_bitrate_bps",
    width: "wifi_station_transmit_channel_width_mhz",
    streams: "wifi_station_transmit_spatial_streams",
    mcs: "wifi_station_transmit_mcs",
    vht_mcs: "wifi_station_transmit_vht_mcs",
    he_mcs: "wifi_station_transmit_he_mcs",
    short_gi: "wifi_station_transmit_short_gi",
};

const RX_RATE: RateNames = RateNames {
    bitrate: "wifi_station_receive_bitrate_bps",
    width: "wifi_station_receive_channel_width_mhz",
    streams: "wifi_station_receive_spatial_streams",
    mcs: "wifi_station_receive_mcs",
    vht_mcs: "wifi_station_receive_vht_mcs",
    he_mcs: "wifi_station_receive_he_mcs",
    short_gi: "wifi_station_receive_short_gi",
};

const STATION_FLAGS: [(&str, u32); 7] = [
    ("wifi_station_authorized", NL80211_STA_FLAG_AUTHORIZED),
    ("wifi_station_authenticated", NL80211_STA_FLAG_AUTHENTICATED),
    ("wifi_station_associated", NL80211_STA_FLAG_ASSOCIATED),
    ("wifi_station_short_preamble", NL80211_STA_FLAG_SHORT_PREAMBLE),
    ("wifi_station_wme", NL80211_STA_FLAG_WME),
    ("wifi_station_mfp", NL80211_STA_FLAG_MFP),
    ("wifi_station_tdls_peer", NL80211_STA_FLAG_TDLS_PEER),
];

fn format_rate(lines: &mut Lines, names: &RateNames, rate: &RateInfo) {
    lines.unsigned(names.bitrate, rate.bitrate_bps());
    lines.unsigned(names.width, Some(rate.width.mhz()));
    lines.unsigned(names.streams, rate.spatial_streams());
    lines.unsigned(names.mcs, rate.mcs);
    lines.unsigned(names.vht_mcs, rate.vht_mcs);
    lines.unsigned(names.he_mcs, rate.he_mcs);
    lines.flag(names.short_gi, rate.short_gi);
}

/// Lines for one station, labelled with device and station MAC
#[must_use]
pub fn format_station(device: &str, station: &StationRecord) -> Vec<MetricLine> {
    let info = &station.info;
    let mut lines = Lines::new(vec![
        ("device", device.to_owned()),
        ("station", station.mac.to_string()),
    ]);

    lines.unsigned("wifi_station_inactive_time_ms", info.inactive_time_ms);
    lines.unsigned("wifi_station_connected_time_seconds", info.connected_time_s);

    lines.unsigned("wifi_station_receive_bytes_total", info.rx_bytes);
    lines.unsigned("wifi_station_transmit_bytes_total", info.tx_bytes);
    lines.unsigned("wifi_station_receive_packets_total", info.rx_packets);
    lines.unsigned("wifi_station_transmit_packets_total", info.tx_packets);
    lines.unsigned("wifi_station_transmit_retries_total", info.tx_retries);
    lines.unsigned("wifi_station_transmit_failed_total", info.tx_failed);
    lines.unsigned("wifi_station_receive_drop_misc_total", info.rx_drop_misc);
    lines.unsigned("wifi_station_receive_mpdus_total", info.rx_mpdus);
    lines.unsigned("wifi_station_fcs_errors_total", info.fcs_error_count);
    lines.unsigned("wifi_station_beacon_loss_total", info.beacon_loss);
    lines.unsigned("wifi_station_beacon_receive_total", info.beacon_rx);

    lines.signed("wifi_station_signal_dbm", info.signal_dbm);
    lines.signed("wifi_station_signal_avg_dbm", info.signal_avg_dbm);
    lines.signed("wifi_station_beacon_signal_avg_dbm", info.beacon_signal_avg_dbm);
    lines.signed("wifi_station_ack_signal_dbm", info.ack_signal_dbm);
    for (chain, signal) in info.chain_signal_dbm.iter().enumerate() {
        lines.push(
            "wifi_station_chain_signal_dbm",
            Some(("chain", chain.to_string())),
            MetricValue::Signed(i64::from(*signal)),
        );
    }
    for (chain, signal) in info.chain_signal_avg_dbm.iter().enumerate() {
        lines.push(
            "wifi_station_chain_signal_avg_dbm",
            Some(("chain", chain.to_string())),
            MetricValue::Signed(i64::from(*signal)),
        );
    }

    lines.unsigned("wifi_station_t_offset_us", info.t_offset_us);
    lines.unsigned("wifi_station_receive_duration_us", info.rx_duration_us);
    lines.unsigned("wifi_station_transmit_duration_us", info.tx_duration_us);
    lines.unsigned("wifi_station_expected_throughput_kbps", info.expected_throughput_kbps);

    lines.unsigned("wifi_station_mesh_llid", info.llid);
    lines.unsigned("wifi_station_mesh_plid", info.plid);
    lines.unsigned("wifi_station_mesh_plink_state", info.plink_state);
    lines.unsigned("wifi_station_mesh_local_power_mode", info.local_pm);
    lines.unsigned("wifi_station_mesh_peer_power_mode", info.peer_pm);
    lines.unsigned("wifi_station_mesh_nonpeer_power_mode", info.nonpeer_pm);

    if let Some(rate) = &info.tx_bitrate {
        format_rate(&mut lines, &TX_RATE, rate);
    }
    if let Some(rate) = &info.rx_bitrate {
        format_rate(&mut lines, &RX_RATE, rate);
    }

    if let Some(flags) = &info.flags {
        for (name, flag) in STATION_FLAGS {
            if let Some(value) = flags.get(flag) {
                lines.flag(name, value);
            }
        }
    }

    if let Some(bss) = &info.bss_param {
        lines.unsigned("wifi_station_bss_dtim_period", bss.dtim_period);
        lines.unsigned("wifi_station_bss_beacon_interval_tu", bss.beacon_interval);
        lines.flag("wifi_station_bss_cts_protection", bss.cts_protection);
        lines.flag("wifi_station_bss_short_preamble", bss.short_preamble);
        lines.flag("wifi_station_bss_short_slot_time", bss.short_slot_time);
    }

    for tid in &info.tid_stats {
        let counters = [
            ("wifi_station_tid_receive_msdu_total", tid.rx_msdu),
            ("wifi_station_tid_transmit_msdu_total", tid.tx_msdu),
            ("wifi_station_tid_transmit_msdu_retries_total", tid.tx_msdu_retries),
            ("wifi_station_tid_transmit_msdu_failed_total", tid.tx_msdu_failed),
        ];
        for (name, value) in counters {
            if let Some(value) = value {
                lines.push(name, Some(("tid", tid.tid.to_string())), MetricValue::Unsigned(value));
            }
        }
    }

    lines.finish()
}

// ============================================================================
// SURVEY
// ============================================================================

struct SurveyNames {
    noise: &'static str,
    time: &'static str,
    busy: &'static str,
    ext_busy: &'static str,
    rx: &'static str,
    tx: &'static str,
    scan: &'static str,
    bss_rx: &'static str,
}

const SURVEY: SurveyNames = SurveyNames {
    noise: "wifi_survey_noise_dbm",
    time: "wifi_survey_channel_time_ms",
    busy: "wifi_survey_channel_time_busy_ms",
    ext_busy: "wifi_survey_channel_time_ext_busy_ms",
    rx: "wifi_survey_channel_time_rx_ms",
    tx: "wifi_survey_channel_time_tx_ms",
    scan: "wifi_survey_channel_time_scan_ms",
    bss_rx: "wifi_survey_channel_time_bss_rx_ms",
};

const ACTIVE_CHANNEL: SurveyNames = SurveyNames {
    noise: "wifi_active_channel_noise_dbm",
    time: "wifi_active_channel_time_ms",
    busy: "wifi_active_channel_time_busy_ms",
    ext_busy: "wifi_active_channel_time_ext_busy_ms",
    rx: "wifi_active_channel_time_rx_ms",
    tx: "wifi_active_channel_time_tx_ms",
    scan: "wifi_active_channel_time_scan_ms",
    bss_rx: "wifi_active_channel_time_bss_rx_ms",
};

fn format_survey_fields(lines: &mut Lines, names: &SurveyNames, survey: &SurveyRecord) {
    lines.signed(names.noise, survey.noise_dbm);
    lines.unsigned(names.time, survey.time_ms);
    lines.unsigned(names.busy, survey.time_busy_ms);
    lines.unsigned(names.ext_busy, survey.time_ext_busy_ms);
    lines.unsigned(names.rx, survey.time_rx_ms);
    lines.unsigned(names.tx, survey.time_tx_ms);
    lines.unsigned(names.scan, survey.time_scan_ms);
    lines.unsigned(names.bss_rx, survey.time_bss_rx_ms);
}

/// Lines for one surveyed channel
///
/// The channel in use is reported a second time under
/// `wifi_active_channel_*`, labelled by device only.
#[must_use]
pub fn format_survey(device: &str, survey: &SurveyRecord) -> Vec<MetricLine> {
    let mut lines = Lines::new(vec![
        ("device", device.to_owned()),
        ("frequency", survey.frequency_mhz.to_string()),
    ]);
    lines.flag("wifi_survey_in_use", survey.in_use);
    format_survey_fields(&mut lines, &SURVEY, survey);
    let mut out = lines.finish();

    if survey.in_use {
        let mut active = Lines::new(vec![("device", device.to_owned())]);
        active.unsigned("wifi_active_channel_frequency_mhz", Some(survey.frequency_mhz));
        format_survey_fields(&mut active, &ACTIVE_CHANNEL, survey);
        out.extend(active.finish());
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
