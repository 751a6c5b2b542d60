//! Channel survey records from `NL80211_CMD_GET_SURVEY` dumps
//!
//! One reply per channel the radio has surveyed. Times are in milliseconds
//! since the driver started counting; noise is in dBm.

use crate::netlink::attributes::{AttrKind, RecordError, decode};
use crate::netlink::structures::*;

static SURVEY_INFO_POLICY: [(u16, AttrKind); 10] = [
    (NL80211_SURVEY_INFO_FREQUENCY, AttrKind::U32),
    (NL80211_SURVEY_INFO_NOISE, AttrKind::U8),
    (NL80211_SURVEY_INFO_IN_USE, AttrKind::Flag),
    (NL80211_SURVEY_INFO_TIME, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_BUSY, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_EXT_BUSY, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_RX, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_TX, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_SCAN, AttrKind::U64),
    (NL80211_SURVEY_INFO_TIME_BSS_RX, AttrKind::U64),
];

static SURVEY_MESSAGE_POLICY: [(u16, AttrKind); 2] = [
    (NL80211_ATTR_IFINDEX, AttrKind::U32),
    (NL80211_ATTR_SURVEY_INFO, AttrKind::Nested(&SURVEY_INFO_POLICY)),
];

/// One surveyed channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurveyRecord {
    pub ifindex: u32,
    pub frequency_mhz: u32,
    pub noise_dbm: Option<i8>,
    /// The radio is currently operating on this channel
    pub in_use: bool,
    pub time_ms: Option<u64>,
    pub time_busy_ms: Option<u64>,
    pub time_ext_busy_ms: Option<u64>,
    pub time_rx_ms: Option<u64>,
    pub time_tx_ms: Option<u64>,
    pub time_scan_ms: Option<u64>,
    pub time_bss_rx_ms: Option<u64>,
}

/// Decode the attribute payload of one `NEW_SURVEY_RESULTS` message
///
/// # Errors
///
/// `MissingMandatoryField` without ifindex, survey block or frequency;
/// `MalformedAttributes` when the block violates its policy.
pub fn decode_survey_message(payload: &[u8]) -> Result<SurveyRecord, RecordError> {
    let attrs = decode(payload, &SURVEY_MESSAGE_POLICY)?;

    let ifindex = attrs
        .u32(NL80211_ATTR_IFINDEX)
        .ok_or(RecordError::MissingMandatoryField("ifindex"))?;
    let survey = attrs
        .nested(NL80211_ATTR_SURVEY_INFO)
        .ok_or(RecordError::MissingMandatoryField("survey_info"))?;
    let frequency_mhz = survey
        .u32(NL80211_SURVEY_INFO_FREQUENCY)
        .ok_or(RecordError::MissingMandatoryField("frequency"))?;

    Ok(SurveyRecord {
        ifindex,
        frequency_mhz,
        noise_dbm: survey.i8(NL80211_SURVEY_INFO_NOISE),
        in_use: survey.flag(NL80211_SURVEY_INFO_IN_USE),
        time_ms: survey.u64(NL80211_SURVEY_INFO_TIME),
        time_busy_ms: survey.u64(NL80211_SURVEY_INFO_TIME_BUSY),
        time_ext_busy_ms: survey.u64(NL80211_SURVEY_INFO_TIME_EXT_BUSY),
        time_rx_ms: survey.u64(NL80211_SURVEY_INFO_TIME_RX),
        time_tx_ms: survey.u64(NL80211_SURVEY_INFO_TIME_TX),
        time_scan_ms: survey.u64(NL80211_SURVEY_INFO_TIME_SCAN),
        time_bss_rx_ms: survey.u64(NL80211_SURVEY_INFO_TIME_BSS_RX),
    })
}
