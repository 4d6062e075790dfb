//! Parser for Gemini request logs.
//!
//! One Gemini request produces two syslog lines: a *vger* line from the
//! Gemini server carrying host, path and status, and a *relayd* line
//! carrying the peer address. The two halves arrive interleaved in either
//! order and are paired by string-equal timestamps; unpaired halves at
//! end-of-file are dropped.
//!
//! ```text
//! Jan  1 12:12:12 node vger: request "gemini/example.org/a.gmi" 20 1024
//! Jan  1 12:12:12 node relayd[4711]: relay gemini, session 7 (1 active), 0, 203.0.113.7 -> 127.0.0.1:1965, done
//! ```

use crate::anonymize::anonymize;

use super::event::{Event, Protocol};
use super::source::Flow;

/// The half of a request logged by the Gemini server.
#[derive(Debug, Clone)]
struct VgerLine {
    date: u32,
    time: String,
    host: String,
    uri_path: String,
    status: String,
}

/// The half of a request logged by the relay.
#[derive(Debug, Clone)]
struct RelaydLine {
    time: String,
    ip: String,
}

/// Stateful parser pairing vger and relayd lines into events.
///
/// One in-flight slot is kept per side. An incoming line first tries to
/// pair against the opposite slot; on a timestamp match the merged event
/// is emitted and that slot cleared, otherwise the line takes its own
/// slot, replacing any stale occupant.
pub struct GeminiParser {
    watermark: u32,
    vger: Option<VgerLine>,
    relayd: Option<RelaydLine>,
}

impl GeminiParser {
    /// `watermark` is the last day already persisted for the Gemini
    /// protocol; 0 disables the cutoff.
    pub fn new(watermark: u32) -> Self {
        Self {
            watermark,
            vger: None,
            relayd: None,
        }
    }

    /// Feeds one whitespace-split syslog line.
    ///
    /// Lines matching neither shape are ignored. A relayd line dated at or
    /// before the watermark yields [`Flow::Stop`].
    pub fn parse(&mut self, file_year: i32, fields: &[&str]) -> (Option<Event>, Flow) {
        if fields.get(4) == Some(&"vger:") {
            let Some(vger) = parse_vger(file_year, fields) else {
                return (None, Flow::Continue);
            };
            return (self.on_vger(vger), Flow::Continue);
        }

        if fields.get(5) == Some(&"relay")
            && fields.get(6).is_some_and(|f| f.starts_with("gemini"))
        {
            let Some((date, relayd)) = parse_relayd(file_year, fields) else {
                return (None, Flow::Continue);
            };

            if self.watermark != 0 && date <= self.watermark {
                return (None, Flow::Stop);
            }

            return (self.on_relayd(relayd), Flow::Continue);
        }

        (None, Flow::Continue)
    }

    fn on_vger(&mut self, vger: VgerLine) -> Option<Event> {
        match self.relayd.take() {
            Some(relayd) if relayd.time == vger.time => Some(merged_event(vger, relayd)),
            held => {
                self.relayd = held;
                self.vger = Some(vger);
                None
            }
        }
    }

    fn on_relayd(&mut self, relayd: RelaydLine) -> Option<Event> {
        match self.vger.take() {
            Some(vger) if vger.time == relayd.time => Some(merged_event(vger, relayd)),
            held => {
                self.vger = held;
                self.relayd = Some(relayd);
                None
            }
        }
    }
}

fn merged_event(vger: VgerLine, relayd: RelaydLine) -> Event {
    let (ip_hash, ip_family) = anonymize(&relayd.ip);

    Event {
        protocol: Protocol::Gemini,
        host: vger.host,
        ip_hash,
        ip_family,
        date: vger.date,
        time: vger.time,
        uri_path: vger.uri_path,
        status: vger.status,
    }
}

fn parse_vger(file_year: i32, fields: &[&str]) -> Option<VgerLine> {
    let date = syslog_date(file_year, fields)?;
    let time = syslog_time(fields.get(2)?)?;

    // The request is the first double-quoted field after the tag; the
    // status code follows it.
    let quoted = fields
        .iter()
        .position(|f| f.starts_with('"'))?;
    let request = fields.get(quoted)?.trim_matches('"');
    let status = fields.get(quoted + 1)?;

    // "<scheme>/<host>/<path...>"
    let mut parts = request.splitn(3, '/');
    let _scheme = parts.next()?;
    let host = parts.next()?;
    if host.is_empty() {
        return None;
    }
    let rest = parts.next().unwrap_or("");

    Some(VgerLine {
        date,
        time,
        host: host.to_string(),
        uri_path: format!("/{rest}"),
        status: status.to_string(),
    })
}

fn parse_relayd(file_year: i32, fields: &[&str]) -> Option<(u32, RelaydLine)> {
    let date = syslog_date(file_year, fields)?;
    let time = syslog_time(fields.get(2)?)?;
    let ip = fields.get(12)?;

    Some((
        date,
        RelaydLine {
            time,
            ip: ip.to_string(),
        },
    ))
}

/// `month day` at fields 0-1 plus the file year → `YYYYMMDD`.
fn syslog_date(file_year: i32, fields: &[&str]) -> Option<u32> {
    let month = month_number(fields.first()?)?;
    let day: u32 = fields.get(1)?.parse().ok()?;
    if !(1..=31).contains(&day) {
        return None;
    }

    Some(file_year as u32 * 10_000 + month * 100 + day)
}

/// `HH:MM:SS` → `HHMMSS`, the same granularity the web parser emits.
fn syslog_time(field: &str) -> Option<String> {
    let mut parts = field.split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let time = format!("{h}{m}{s}");
    if time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(time)
}

fn month_number(name: &str) -> Option<u32> {
    match name {
        "Jan" => Some(1),
        "Feb" => Some(2),
        "Mar" => Some(3),
        "Apr" => Some(4),
        "May" => Some(5),
        "Jun" => Some(6),
        "Jul" => Some(7),
        "Aug" => Some(8),
        "Sep" => Some(9),
        "Oct" => Some(10),
        "Nov" => Some(11),
        "Dec" => Some(12),
        _ => None,
    }
}
