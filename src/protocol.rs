/// Line protocol shared by sensing nodes, the relay mesh and the head-end.
///
/// All messages are newline-delimited JSON (NDJSON). The detection line is
/// written by hand with `core::fmt` because its coordinates must carry exactly
/// six decimal places; status lines go through `serde_json_core`.
/// Uses `heapless` types for no_std/no-alloc operation.
use core::fmt::{self, Write};

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::tracker::DetectionRecord;

/// 6-byte hardware address of a broadcasting drone.
pub type MacAddr = [u8; 6];

/// Maximum length for MAC address strings ("aa:bb:cc:dd:ee:ff")
pub type MacString = String<18>;

/// Sensor tag as text. Inbound tags from other firmware may be longer than
/// ours, so there is some slack.
pub type TagString = String<8>;

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for one outbound line (without the trailing newline)
pub type LineBuffer = String<MAX_MSG_LEN>;

/// Format a MAC address as lowercase colon-separated hex.
pub fn format_mac(mac: &MacAddr) -> MacString {
    let mut s = MacString::new();
    for (i, b) in mac.iter().enumerate() {
        if i > 0 {
            let _ = s.push(':');
        }
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Parse "aa:bb:cc:dd:ee:ff" (either case). Anything else is `None`.
pub fn parse_mac(s: &str) -> Option<MacAddr> {
    let s = s.as_bytes();
    if s.len() != 17 {
        return None;
    }
    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        let at = i * 3;
        if i > 0 && s[at - 1] != b':' {
            return None;
        }
        *byte = (hex_nibble(s[at])? << 4) | hex_nibble(s[at + 1])?;
    }
    Some(mac)
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Identifies which sensing unit produced a detection: the last two bytes of
/// the unit's factory MAC, shown as four uppercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTag(pub [u8; 2]);

impl SensorTag {
    pub fn from_mac(mac: &MacAddr) -> Self {
        Self([mac[4], mac[5]])
    }

    pub fn as_string(&self) -> TagString {
        let mut s = TagString::new();
        let _ = write!(s, "{}", self);
        s
    }
}

impl fmt::Display for SensorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.0[0], self.0[1])
    }
}

/// Write `s` as the inside of a JSON string.
fn write_json_str<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

/// Render one detection line:
///
/// `{"mac":"..","rssi":-60,"drone_lat":..,"drone_long":..,"drone_altitude":..,
///   "pilot_lat":..,"pilot_long":..,"basic_id":"..","node_id":"A1B2"}`
///
/// No trailing newline; sinks add it.
pub fn format_detection(
    record: &DetectionRecord,
    tag: &SensorTag,
    out: &mut LineBuffer,
) -> fmt::Result {
    out.clear();
    write!(
        out,
        "{{\"mac\":\"{}\",\"rssi\":{},\"drone_lat\":{:.6},\"drone_long\":{:.6},\"drone_altitude\":{},\"pilot_lat\":{:.6},\"pilot_long\":{:.6},\"basic_id\":\"",
        format_mac(&record.mac),
        record.rssi,
        record.drone_lat,
        record.drone_long,
        record.altitude_msl as i32,
        record.pilot_lat,
        record.pilot_long,
    )?;
    write_json_str(out, &record.uas_id)?;
    write!(out, "\",\"node_id\":\"{}\"}}", tag)
}

// ── Status messages ────────────────────────────────────────────────────

/// Sensing-node liveness line.
#[derive(Debug, Serialize)]
pub struct NodeHeartbeat<'a> {
    pub heartbeat: &'static str,
    pub node_id: &'a str,
    /// Drones seen within the active window
    pub tracked: u32,
}

impl<'a> NodeHeartbeat<'a> {
    pub fn new(node_id: &'a str, tracked: u32) -> Self {
        Self {
            heartbeat: "node_active",
            node_id,
            tracked,
        }
    }
}

/// Head-end liveness line.
#[derive(Debug, Serialize)]
pub struct HeadHeartbeat {
    pub heartbeat: &'static str,
    pub tracked_drones: u32,
}

impl HeadHeartbeat {
    pub fn new(tracked_drones: u32) -> Self {
        Self {
            heartbeat: "he_active",
            tracked_drones,
        }
    }
}

/// Head-end counters, reported periodically.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeadStats {
    pub received: u32,
    pub forwarded: u32,
    pub suppressed: u32,
    pub non_json: u32,
    pub bytes: u32,
}

/// Stats line, tagged so the mapper can tell it from a detection.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub stats: &'static str,
    pub received: u32,
    pub forwarded: u32,
    pub suppressed: u32,
    pub non_json: u32,
    pub bytes: u32,
    pub tracked_drones: u32,
    /// Seconds since boot
    pub uptime: u32,
}

impl StatsReport {
    pub fn new(counters: &HeadStats, tracked_drones: u32, uptime: u32) -> Self {
        Self {
            stats: "he",
            received: counters.received,
            forwarded: counters.forwarded,
            suppressed: counters.suppressed,
            non_json: counters.non_json,
            bytes: counters.bytes,
            tracked_drones,
            uptime,
        }
    }
}

/// Per-drone dedup summary that follows a stats line. Keyed `drone` rather
/// than `mac` so it is never mistaken for a detection.
#[derive(Debug, Serialize)]
pub struct DroneSummary<'a> {
    pub drone: &'a str,
    pub first_node: &'a str,
    pub suppressed: u32,
    /// Seconds since the drone was last reported
    pub age_s: u32,
}

/// Decoded string field of an inbound line. No field outlives its line, so
/// a line's worth of capacity always fits.
pub type FieldString = String<MAX_MSG_LEN>;

/// The fields the head-end reads from an inbound detection line. Unknown
/// fields are skipped. `mac` and `node_id` borrow from the line; `basic_id`
/// is free text and comes back with its JSON escapes decoded.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct InboundFields<'a> {
    #[serde(default, borrow)]
    pub mac: Option<&'a str>,
    #[serde(default, borrow)]
    pub node_id: Option<&'a str>,
    #[serde(default)]
    pub basic_id: Option<FieldString>,
}

/// Pull `mac`, `node_id` and `basic_id` out of a JSON object line. `None`
/// when the line doesn't parse as an object.
pub fn extract_fields(line: &str) -> Option<InboundFields<'_>> {
    let mut unescaped = [0u8; MAX_MSG_LEN];
    serde_json_core::from_str_escaped::<InboundFields<'_>>(line, &mut unescaped)
        .ok()
        .map(|(fields, _)| fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::DetectionRecord;

    fn sample_record() -> DetectionRecord {
        let mut r = DetectionRecord::new([0x60, 0x60, 0x1F, 0xAB, 0xCD, 0xEF]);
        r.rssi = -62;
        r.drone_lat = 51.4769;
        r.drone_long = -0.0005;
        r.altitude_msl = 120.7;
        r.pilot_lat = 51.47;
        r.pilot_long = -0.001;
        let _ = r.uas_id.push_str("1581F5FJD228400B0Z");
        r
    }

    // ── MAC and tag formatting ──────────────────────────────────────

    #[test]
    fn mac_formats_lowercase() {
        let s = format_mac(&[0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x0F]);
        assert_eq!(s.as_str(), "aa:bb:cc:01:02:0f");
    }

    #[test]
    fn mac_parse_accepts_either_case() {
        let mac = [0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x0F];
        assert_eq!(parse_mac("aa:bb:cc:01:02:0f"), Some(mac));
        assert_eq!(parse_mac("AA:BB:CC:01:02:0F"), Some(mac));
    }

    #[test]
    fn mac_parse_rejects_garbage() {
        assert_eq!(parse_mac(""), None);
        assert_eq!(parse_mac("aa:bb:cc:01:02"), None);
        assert_eq!(parse_mac("aa-bb-cc-01-02-0f"), None);
        assert_eq!(parse_mac("zz:bb:cc:01:02:0f"), None);
    }

    #[test]
    fn sensor_tag_from_last_two_bytes() {
        let tag = SensorTag::from_mac(&[0, 0, 0, 0, 0xA1, 0x0B]);
        assert_eq!(tag.as_string().as_str(), "A10B");
    }

    // ── Detection line ──────────────────────────────────────────────

    #[test]
    fn detection_line_exact_format() {
        let mut line = LineBuffer::new();
        format_detection(&sample_record(), &SensorTag([0xA1, 0xB2]), &mut line).unwrap();
        assert_eq!(
            line.as_str(),
            r#"{"mac":"60:60:1f:ab:cd:ef","rssi":-62,"drone_lat":51.476900,"drone_long":-0.000500,"drone_altitude":120,"pilot_lat":51.470000,"pilot_long":-0.001000,"basic_id":"1581F5FJD228400B0Z","node_id":"A1B2"}"#
        );
    }

    #[test]
    fn detection_line_defaults_to_zero() {
        let record = DetectionRecord::new([1, 2, 3, 4, 5, 6]);
        let mut line = LineBuffer::new();
        format_detection(&record, &SensorTag([0, 1]), &mut line).unwrap();
        assert!(line.contains(r#""drone_lat":0.000000"#));
        assert!(line.contains(r#""drone_altitude":0"#));
        assert!(line.contains(r#""basic_id":"""#));
    }

    #[test]
    fn detection_line_escapes_quotes() {
        let mut record = DetectionRecord::new([1, 2, 3, 4, 5, 6]);
        let _ = record.uas_id.push_str(r#"A"B\C"#);
        let mut line = LineBuffer::new();
        format_detection(&record, &SensorTag([0, 1]), &mut line).unwrap();
        assert!(line.contains(r#""basic_id":"A\"B\\C""#));
    }

    #[test]
    fn detection_line_round_trips_identity_fields() {
        let record = sample_record();
        let mut line = LineBuffer::new();
        format_detection(&record, &SensorTag([0x00, 0x7F]), &mut line).unwrap();

        let fields = extract_fields(&line).unwrap();
        assert_eq!(fields.mac, Some("60:60:1f:ab:cd:ef"));
        assert_eq!(fields.node_id, Some("007F"));
        assert_eq!(fields.basic_id.as_deref(), Some(record.uas_id.as_str()));
        assert_eq!(parse_mac(fields.mac.unwrap()), Some(record.mac));
    }

    #[test]
    fn detection_line_round_trips_quote_and_backslash() {
        let mut record = DetectionRecord::new([1, 2, 3, 4, 5, 6]);
        let _ = record.uas_id.push_str(r#"AB"C\D"#);
        let mut line = LineBuffer::new();
        format_detection(&record, &SensorTag([0x12, 0x34]), &mut line).unwrap();

        let fields = extract_fields(&line).unwrap();
        assert_eq!(fields.basic_id.as_deref(), Some(r#"AB"C\D"#));
        assert_eq!(fields.mac, Some("01:02:03:04:05:06"));
        assert_eq!(fields.node_id, Some("1234"));
    }

    // ── Inbound extraction ──────────────────────────────────────────

    #[test]
    fn extract_ignores_unknown_fields() {
        let f = extract_fields(r#"{"rssi":-40,"mac":"aa:bb:cc:dd:ee:ff","extra":true}"#).unwrap();
        assert_eq!(f.mac, Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(f.node_id, None);
    }

    #[test]
    fn extract_missing_mac_is_none() {
        let f = extract_fields(r#"{"heartbeat":"node_active","node_id":"A1B2"}"#).unwrap();
        assert_eq!(f.mac, None);
        assert_eq!(f.node_id, Some("A1B2"));
    }

    #[test]
    fn extract_rejects_non_json() {
        assert!(extract_fields("{incomplete").is_none());
        assert!(extract_fields("hello").is_none());
    }

    // ── Status messages ─────────────────────────────────────────────

    #[test]
    fn node_heartbeat_format() {
        let mut buf = [0u8; 128];
        let len = serde_json_core::to_slice(&NodeHeartbeat::new("A1B2", 3), &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(json, r#"{"heartbeat":"node_active","node_id":"A1B2","tracked":3}"#);
    }

    #[test]
    fn head_heartbeat_format() {
        let mut buf = [0u8; 128];
        let len = serde_json_core::to_slice(&HeadHeartbeat::new(2), &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(json, r#"{"heartbeat":"he_active","tracked_drones":2}"#);
    }

    #[test]
    fn drone_summary_has_no_mac_key() {
        let mut buf = [0u8; 128];
        let msg = DroneSummary {
            drone: "aa:bb:cc:dd:ee:ff",
            first_node: "A1B2",
            suppressed: 4,
            age_s: 12,
        };
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""drone":"aa:bb:cc:dd:ee:ff""#));
        assert!(json.contains(r#""suppressed":4"#));
        assert!(!json.contains(r#""mac""#));
    }

    #[test]
    fn stats_report_format() {
        let counters = HeadStats {
            received: 10,
            forwarded: 6,
            suppressed: 3,
            non_json: 1,
            bytes: 2048,
        };
        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&StatsReport::new(&counters, 2, 60), &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.starts_with(r#"{"stats":"he","received":10,"forwarded":6"#));
        assert!(json.contains(r#""non_json":1"#));
        assert!(json.contains(r#""tracked_drones":2"#));
    }
}
