//! Parser for combined/forwarded-style HTTP access-log lines.
//!
//! Expected positional layout (whitespace-split):
//!
//! ```text
//! 0      1    2 3 4                      5       6      7      8          9
//! vhost  ip   - - [dd/Mon/yyyy:HH:MM:SS zone]   "GET   /path  HTTP/1.1"  200 ... xff port
//! ```
//!
//! The penultimate field carries an X-Forwarded-For override; when it is
//! `-` the connecting address at field 1 is used instead. Malformed lines
//! are skipped silently.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::anonymize::anonymize;

use super::event::{Event, Protocol};
use super::source::Flow;

/// Stateless parser for one web access-log line.
pub struct WebParser {
    watermark: u32,
}

impl WebParser {
    /// `watermark` is the last day already persisted for the web protocol;
    /// 0 disables the cutoff.
    pub fn new(watermark: u32) -> Self {
        Self { watermark }
    }

    /// Parses one whitespace-split line into an [`Event`].
    ///
    /// Lines dated at or before the watermark yield [`Flow::Stop`]: that
    /// day's snapshot already exists, and counting it again would double
    /// the counters on a re-run.
    pub fn parse(&self, fields: &[&str]) -> (Option<Event>, Flow) {
        if fields.len() < 10 {
            return (None, Flow::Continue);
        }

        let Some((date, time)) = parse_timestamp(fields[4]) else {
            return (None, Flow::Continue);
        };

        if self.watermark != 0 && date <= self.watermark {
            return (None, Flow::Stop);
        }

        let host = fields[0];
        let uri_path = fields[7];
        let status = fields[9];

        // X-Forwarded-For override sits in the penultimate field.
        let forwarded = fields[fields.len() - 2];
        let ip = if forwarded == "-" { fields[1] } else { forwarded };

        let (ip_hash, ip_family) = anonymize(ip);

        let event = Event {
            protocol: Protocol::Web,
            host: host.to_string(),
            ip_hash,
            ip_family,
            date,
            time,
            uri_path: uri_path.to_string(),
            status: status.to_string(),
        };

        (Some(event), Flow::Continue)
    }
}

/// `[dd/Mon/yyyy:HH:MM:SS` → `(YYYYMMDD, HHMMSS)`.
fn parse_timestamp(field: &str) -> Option<(u32, String)> {
    let stamp = field.strip_prefix('[').unwrap_or(field);
    let parsed = NaiveDateTime::parse_from_str(stamp, "%d/%b/%Y:%H:%M:%S").ok()?;

    let date = parsed.year() as u32 * 10_000 + parsed.month() * 100 + parsed.day();
    let time = format!(
        "{:02}{:02}{:02}",
        parsed.hour(),
        parsed.minute(),
        parsed.second()
    );

    Some((date, time))
}

#[cfg(test)]
mod tests {
    use super::super::event::IpFamily;
    use super::*;

    fn line(raw: &str) -> Vec<&str> {
        raw.split_whitespace().collect()
    }

    const SAMPLE: &str = r#"example.org 203.0.113.7 - - [01/Jan/2025:12:12:12 +0100] "GET /index.html HTTP/1.1" 200 5120 "-" "curl/8.0" - 443"#;

    #[test]
    fn test_parses_combined_line() {
        let parser = WebParser::new(0);
        let (event, flow) = parser.parse(&line(SAMPLE));

        let event = event.expect("event");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(event.protocol, Protocol::Web);
        assert_eq!(event.host, "example.org");
        assert_eq!(event.date, 20250101);
        assert_eq!(event.time, "121212");
        assert_eq!(event.uri_path, "/index.html");
        assert_eq!(event.status, "200");
        assert_eq!(event.ip_family, IpFamily::V4);
    }

    #[test]
    fn test_forwarded_for_overrides_connecting_ip() {
        let direct = WebParser::new(0).parse(&line(SAMPLE)).0.expect("event");

        let forwarded = SAMPLE.replace(r#""curl/8.0" - 443"#, r#""curl/8.0" 198.51.100.9 443"#);
        let via_proxy = WebParser::new(0)
            .parse(&line(&forwarded))
            .0
            .expect("event");

        assert_ne!(direct.ip_hash, via_proxy.ip_hash);

        let (expected, _) = crate::anonymize::anonymize("198.51.100.9");
        assert_eq!(via_proxy.ip_hash, expected);
    }

    #[test]
    fn test_v6_client() {
        let raw = SAMPLE.replace("203.0.113.7", "2001:db8::1");
        let event = WebParser::new(0).parse(&line(&raw)).0.expect("event");
        assert_eq!(event.ip_family, IpFamily::V6);
    }

    #[test]
    fn test_short_line_skipped() {
        let parser = WebParser::new(0);
        let (event, flow) = parser.parse(&line("example.org 203.0.113.7 - -"));
        assert!(event.is_none());
        assert_eq!(flow, Flow::Continue);
    }

    #[test]
    fn test_garbage_timestamp_skipped() {
        let raw = SAMPLE.replace("[01/Jan/2025:12:12:12", "[yesterday-ish");
        let (event, flow) = WebParser::new(0).parse(&line(&raw));
        assert!(event.is_none());
        assert_eq!(flow, Flow::Continue);
    }

    #[test]
    fn test_watermark_stops_on_same_day() {
        let parser = WebParser::new(20250101);
        let (event, flow) = parser.parse(&line(SAMPLE));
        assert!(event.is_none());
        assert_eq!(flow, Flow::Stop);
    }

    #[test]
    fn test_watermark_stops_on_older_day() {
        let parser = WebParser::new(20250104);
        let (event, flow) = parser.parse(&line(SAMPLE));
        assert!(event.is_none());
        assert_eq!(flow, Flow::Stop);
    }

    #[test]
    fn test_newer_day_passes_watermark() {
        let parser = WebParser::new(20241231);
        let (event, flow) = parser.parse(&line(SAMPLE));
        assert!(event.is_some());
        assert_eq!(flow, Flow::Continue);
    }

    #[test]
    fn test_timestamp_format() {
        let (date, time) =
            parse_timestamp("[31/Dec/2024:23:59:09").expect("timestamp");
        assert_eq!(date, 20241231);
        assert_eq!(time, "235909");
    }
}
