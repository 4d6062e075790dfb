use std::fmt;

/// Protocol identifies which server produced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Web,
    Gemini,
}

impl Protocol {
    /// Returns the canonical label used in day keys and snapshot filenames.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Gemini => "gemini",
        }
    }

    /// Convert from the canonical label.
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "web" => Some(Self::Web),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Return both protocols, web first.
    pub fn all() -> &'static [Self] {
        &[Self::Web, Self::Gemini]
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family of the source IP, determined from its textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Returns the counter key for this family.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "v4",
            Self::V6 => "v6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized request record.
///
/// Produced by the parsers, consumed by the filter and the aggregator, then
/// discarded. Events are never persisted; only day-level aggregates are.
#[derive(Debug, Clone)]
pub struct Event {
    pub protocol: Protocol,
    /// The request's `Host` / authority string.
    pub host: String,
    /// Irreversible digest of the source IP (see [`crate::anonymize`]).
    pub ip_hash: String,
    pub ip_family: IpFamily,
    /// `YYYYMMDD` in the server's local time zone.
    pub date: u32,
    /// `HHMMSS`, compared for string equality only (pairing and rate cap).
    pub time: String,
    /// Absolute path beginning with `/`; may carry `?`/`#` suffixes.
    pub uri_path: String,
    /// Protocol status code as a string (HTTP `200`, Gemini `20`, ...).
    pub status: String,
}

impl Event {
    /// The `(protocol, date)` bucket key, e.g. `web_20250101`.
    pub fn day_key(&self) -> String {
        format!("{}_{}", self.protocol, self.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_labels() {
        assert_eq!(Protocol::Web.to_string(), "web");
        assert_eq!(Protocol::Gemini.to_string(), "gemini");
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!(Protocol::from_str("web"), Some(Protocol::Web));
        assert_eq!(Protocol::from_str("gemini"), Some(Protocol::Gemini));
        assert_eq!(Protocol::from_str("gopher"), None);
    }

    #[test]
    fn test_all_protocols() {
        assert_eq!(Protocol::all(), &[Protocol::Web, Protocol::Gemini]);
    }

    #[test]
    fn test_ip_family_labels() {
        assert_eq!(IpFamily::V4.to_string(), "v4");
        assert_eq!(IpFamily::V6.to_string(), "v6");
    }

    #[test]
    fn test_day_key() {
        let event = Event {
            protocol: Protocol::Gemini,
            host: "example.org".to_string(),
            ip_hash: "H1".to_string(),
            ip_family: IpFamily::V4,
            date: 20250101,
            time: "121212".to_string(),
            uri_path: "/a.gmi".to_string(),
            status: "20".to_string(),
        };
        assert_eq!(event.day_key(), "gemini_20250101");
    }
}
