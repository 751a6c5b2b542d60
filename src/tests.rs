// Cross-module tests: one scrape from scripted kernel replies through the
// collector and the HTTP handler.

use crate::http::{METRICS_CONTENT_TYPE, NOT_FOUND_PAGE, ROOT_PAGE, Status};
use crate::netlink::Nl80211Client;
use crate::netlink::structures::*;
use crate::netlink::testing::*;
use crate::*;
use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

// Far above any ifindex a test host will have.
const MISSING_IFINDEX: u32 = 4_000_000;

fn client(connector: ScriptedConnector) -> Nl80211Client<ScriptedConnector> {
    Nl80211Client::new(connector, Duration::from_millis(200))
}

fn collect(connector: ScriptedConnector) -> (Result<CollectionSummary, CollectError>, String) {
    let mut out = Vec::new();
    let result = run_collection(&client(connector), &mut out);
    (result, String::from_utf8(out).unwrap())
}

/// In-memory connection: request bytes in, response bytes out
struct MockStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl MockStream {
    fn new(request: &str) -> Self {
        Self {
            input: Cursor::new(request.as_bytes().to_vec()),
            output: Vec::new(),
        }
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn serve(request: &str, connector: ScriptedConnector) -> (Option<Status>, String) {
    let mut stream = MockStream::new(request);
    let status = handle_connection(&mut stream, &client(connector));
    (status, String::from_utf8(stream.output).unwrap())
}

fn headers_only_200() -> String {
    format!("HTTP/1.0 200 OK\r\nContent-Type: {METRICS_CONTENT_TYPE}\r\nConnection: close\r\n\r\n")
}

fn basic_station(ifindex: u32, mac: [u8; 6]) -> Vec<u8> {
    station_message(ifindex, mac, |sta| {
        sta.put_u32(NL80211_STA_INFO_RX_BYTES, 100)
            .put_u8(NL80211_STA_INFO_SIGNAL, (-40i8) as u8);
    })
}

fn basic_survey(ifindex: u32, frequency: u32) -> Vec<u8> {
    survey_message(ifindex, frequency, |s| {
        s.put_u8(NL80211_SURVEY_INFO_NOISE, (-92i8) as u8);
    })
}

/// Position of the first line starting with `prefix`
fn position(body: &str, prefix: &str) -> usize {
    body.lines()
        .position(|l| l.starts_with(prefix))
        .unwrap_or_else(|| panic!("no line starting with {prefix:?} in:\n{body}"))
}

// ============================================================================
// COLLECTION
// ============================================================================

#[test]
fn test_collection_with_no_interfaces() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![done_message(2)]);

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary, CollectionSummary::default());
    assert!(body.is_empty());
}

#[test]
fn test_collection_order() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[
        interface_message(1, "wlan0"),
        interface_message(2, "wlan1"),
        done_message(2),
    ])]);
    connector.dump_session(vec![basic_station(1, STA_A), done_message(2)]);
    connector.dump_session(vec![basic_survey(1, 2412), done_message(2)]);
    connector.dump_session(vec![basic_station(2, STA_B), done_message(2)]);
    connector.dump_session(vec![basic_survey(2, 5180), done_message(2)]);
    let opened = connector.sessions_opened();

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.interfaces, 2);
    assert_eq!(summary.stations, 2);
    assert_eq!(summary.survey_entries, 2);
    assert_eq!(summary.lines, body.lines().count());
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 5);

    let iface0 = position(&body, r#"wifi_interface_index{device="wlan0"}"#);
    let iface1 = position(&body, r#"wifi_interface_index{device="wlan1"}"#);
    let sta0 = position(&body, r#"wifi_station_receive_bytes_total{device="wlan0""#);
    let survey0 = position(&body, r#"wifi_survey_noise_dbm{device="wlan0""#);
    let sta1 = position(&body, r#"wifi_station_receive_bytes_total{device="wlan1""#);
    let survey1 = position(&body, r#"wifi_survey_noise_dbm{device="wlan1""#);

    // All interface lines precede every station and survey line.
    assert!(iface0 < iface1);
    assert!(iface1 < sta0);
    assert!(sta0 < survey0);
    assert!(survey0 < sta1);
    assert!(sta1 < survey1);
}

#[test]
fn test_malformed_station_does_not_abort() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    let malformed = station_message(1, STA_A, |sta| {
        sta.put_u16(NL80211_STA_INFO_RX_BYTES, 7);
    });
    connector.dump_session(vec![concat(&[malformed, basic_station(1, STA_B), done_message(2)])]);
    connector.dump_session(vec![concat(&[basic_survey(1, 2412), done_message(2)])]);

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.stations, 1);
    assert_eq!(summary.skipped_records, 1);
    assert!(!body.contains("02:00:00:00:00:0a"));
    assert!(body.contains(
        r#"wifi_station_receive_bytes_total{device="wlan0",station="02:00:00:00:00:0b"} 100"#
    ));
    assert!(body.contains(r#"wifi_survey_noise_dbm{device="wlan0",frequency="2412"} -92"#));
}

#[test]
fn test_active_channel_reported_twice() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![done_message(2)]);
    let in_use = survey_message(1, 5180, |s| {
        s.put_u8(NL80211_SURVEY_INFO_NOISE, (-95i8) as u8)
            .put_flag(NL80211_SURVEY_INFO_IN_USE)
            .put_u64(NL80211_SURVEY_INFO_TIME, 1000)
            .put_u64(NL80211_SURVEY_INFO_TIME_BUSY, 250);
    });
    connector.dump_session(vec![concat(&[in_use, basic_survey(1, 2412), done_message(2)])]);

    let (result, body) = collect(connector);
    assert_eq!(result.unwrap().survey_entries, 2);

    for line in [
        r#"wifi_survey_in_use{device="wlan0",frequency="5180"} 1"#,
        r#"wifi_survey_noise_dbm{device="wlan0",frequency="5180"} -95"#,
        r#"wifi_survey_channel_time_ms{device="wlan0",frequency="5180"} 1000"#,
        r#"wifi_survey_channel_time_busy_ms{device="wlan0",frequency="5180"} 250"#,
        r#"wifi_active_channel_frequency_mhz{device="wlan0"} 5180"#,
        r#"wifi_active_channel_noise_dbm{device="wlan0"} -95"#,
        r#"wifi_active_channel_time_ms{device="wlan0"} 1000"#,
        r#"wifi_active_channel_time_busy_ms{device="wlan0"} 250"#,
        r#"wifi_survey_in_use{device="wlan0",frequency="2412"} 0"#,
    ] {
        assert!(body.lines().any(|l| l == line), "missing {line:?} in:\n{body}");
    }
    assert_eq!(body.matches("wifi_active_channel_frequency_mhz").count(), 1);
}

#[test]
fn test_unsupported_dump_is_skipped() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![error_message(2, libc::EOPNOTSUPP)]);
    connector.dump_session(vec![concat(&[basic_survey(1, 2412), done_message(2)])]);

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.skipped_dumps, 1);
    assert_eq!(summary.stations, 0);
    assert_eq!(summary.survey_entries, 1);
    assert!(body.contains("wifi_survey_noise_dbm"));
}

#[test]
fn test_interrupted_dumps_are_counted_not_dropped() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![concat(&[
        interrupted(basic_station(1, STA_A)),
        done_message(2),
    ])]);
    connector.dump_session(vec![done_message(2)]);

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.interrupted_dumps, 1);
    assert_eq!(summary.stations, 1);
    assert!(body.contains("02:00:00:00:00:0a"));
}

#[test]
fn test_failed_collection_closes_every_session() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![done_message(2)]);
    connector.dump_session(vec![error_message(2, libc::ENODEV)]);
    let opened = connector.sessions_opened();
    let closed = connector.sessions_closed();

    let (result, _) = collect(connector);
    assert!(result.is_err());
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[test]
fn test_kernel_error_aborts_collection() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![error_message(2, libc::ENODEV)]);

    let (result, body) = collect(connector);
    assert!(matches!(
        result,
        Err(CollectError::Query(netlink::QueryError::Kernel { errno })) if errno == libc::ENODEV
    ));
    // Interface lines were already written.
    assert!(body.starts_with(r#"wifi_interface_index{device="wlan0"} 1"#));
}

#[test]
fn test_record_for_unknown_interface_is_skipped() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![concat(&[
        basic_station(MISSING_IFINDEX, STA_C),
        basic_station(1, STA_A),
        done_message(2),
    ])]);
    connector.dump_session(vec![done_message(2)]);

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.stations, 1);
    assert_eq!(summary.skipped_records, 1);
    assert!(!body.contains("02:00:00:00:00:0c"));
}

#[test]
fn test_interface_without_name_is_skipped() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[
        interface_message(MISSING_IFINDEX, ""),
        interface_message(1, "wlan0"),
        done_message(2),
    ])]);
    connector.dump_session(vec![done_message(2)]);
    connector.dump_session(vec![done_message(2)]);
    let opened = connector.sessions_opened();

    let (result, body) = collect(connector);
    let summary = result.unwrap();
    assert_eq!(summary.interfaces, 1);
    assert_eq!(summary.skipped_records, 1);
    // No station or survey sessions for the nameless interface.
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(body.lines().count(), 1);
}

#[test]
fn test_collection_is_deterministic() {
    let script = |connector: &ScriptedConnector| {
        connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
        connector.dump_session(vec![concat(&[
            basic_station(1, STA_A),
            basic_station(1, STA_B),
            done_message(2),
        ])]);
        connector.dump_session(vec![concat(&[basic_survey(1, 2412), done_message(2)])]);
    };
    let first = ScriptedConnector::new();
    script(&first);
    let second = ScriptedConnector::new();
    script(&second);

    let (_, a) = collect(first);
    let (_, b) = collect(second);
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

// ============================================================================
// HTTP
// ============================================================================

#[test]
fn test_root_page() {
    let (status, response) = serve("GET / HTTP/1.0\r\n\r\n", ScriptedConnector::new());
    assert_eq!(status, Some(Status::Ok));
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(response.ends_with(ROOT_PAGE));
}

#[test]
fn test_unknown_path_is_404() {
    let (status, response) = serve("GET /unknown HTTP/1.0\r\n\r\n", ScriptedConnector::new());
    assert_eq!(status, Some(Status::NotFound));
    assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
    assert!(response.ends_with(NOT_FOUND_PAGE));
}

#[test]
fn test_post_is_405() {
    let connector = ScriptedConnector::new();
    let opened = connector.sessions_opened();
    let (status, response) = serve("POST / HTTP/1.0\r\n\r\n", connector);
    assert_eq!(status, Some(Status::MethodNotAllowed));
    assert!(response.starts_with("HTTP/1.0 405 Method Not Allowed\r\n"));
    assert!(response.contains("Allow: GET\r\n"));
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn test_old_protocol_is_400() {
    let (status, response) = serve("GET / HTTP/0.9\r\n\r\n", ScriptedConnector::new());
    assert_eq!(status, Some(Status::BadRequest));
    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
}

#[test]
fn test_bad_version_rejected_before_method() {
    let (status, response) = serve("POST / HTTP/0.9\r\n\r\n", ScriptedConnector::new());
    assert_eq!(status, Some(Status::BadRequest));
    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    assert!(!response.contains("Allow: GET"));
}

#[test]
fn test_empty_connection_gets_no_response() {
    let (status, response) = serve("", ScriptedConnector::new());
    assert_eq!(status, None);
    assert!(response.is_empty());
}

#[test]
fn test_metrics_with_no_interfaces() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![done_message(2)]);

    let (status, response) = serve("GET /metrics HTTP/1.0\r\n\r\n", connector);
    assert_eq!(status, Some(Status::Ok));
    assert_eq!(response, headers_only_200());
}

#[test]
fn test_metrics_query_string_ignored() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.dump_session(vec![done_message(2)]);
    connector.dump_session(vec![done_message(2)]);

    let (status, response) =
        serve("GET /metrics?debug=1 HTTP/1.1\r\nHost: x\r\n\r\n", connector);
    assert_eq!(status, Some(Status::Ok));
    assert_eq!(
        response,
        format!("{}wifi_interface_index{{device=\"wlan0\"}} 1\n", headers_only_200())
    );
}

#[test]
fn test_metrics_failure_before_streaming_is_500() {
    let connector = ScriptedConnector::new();
    connector.unavailable_session();

    let (status, response) = serve("GET /metrics HTTP/1.0\r\n\r\n", connector);
    assert_eq!(status, Some(Status::InternalServerError));
    assert!(response.starts_with("HTTP/1.0 500 Internal Server Error\r\n"));
    assert!(!response.contains("wifi_"));
}

#[test]
fn test_metrics_failure_with_only_buffered_lines_is_500() {
    // Interface lines still sit in the response buffer when the station
    // dump fails, so nothing has reached the client yet.
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);
    connector.unavailable_session();

    let (status, response) = serve("GET /metrics HTTP/1.0\r\n\r\n", connector);
    assert_eq!(status, Some(Status::InternalServerError));
    assert!(!response.contains("wifi_interface_index"));
}

#[test]
fn test_metrics_failure_after_streaming_truncates() {
    let connector = ScriptedConnector::new();
    connector.dump_session(vec![concat(&[interface_message(1, "wlan0"), done_message(2)])]);

    // Enough station lines to overflow the response buffer.
    let mut stations: Vec<Vec<u8>> = (0..40u8)
        .map(|i| {
            station_message(1, [0x02, 0, 0, 0, 0x01, i], |sta| {
                sta.put_u32(NL80211_STA_INFO_INACTIVE_TIME, 10)
                    .put_u32(NL80211_STA_INFO_RX_BYTES, 100)
                    .put_u32(NL80211_STA_INFO_TX_BYTES, 200)
                    .put_u32(NL80211_STA_INFO_RX_PACKETS, 3)
                    .put_u32(NL80211_STA_INFO_TX_PACKETS, 4)
                    .put_u32(NL80211_STA_INFO_TX_RETRIES, 5)
                    .put_u32(NL80211_STA_INFO_TX_FAILED, 6)
                    .put_u8(NL80211_STA_INFO_SIGNAL, (-50i8) as u8);
            })
        })
        .collect();
    stations.push(done_message(2));
    connector.dump_session(vec![concat(&stations)]);
    connector.unavailable_session();

    let (status, response) = serve("GET /metrics HTTP/1.0\r\n\r\n", connector);
    assert_eq!(status, None);
    assert!(response.starts_with(&headers_only_200()));
    assert!(response.contains("wifi_station_receive_bytes_total"));
    assert!(!response.contains("500 Internal Server Error"));
    assert!(!response.contains("wifi_survey"));
}
