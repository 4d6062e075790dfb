//! IP anonymization.
//!
//! Every source address is reduced to the base64 encoding of a SHA3-512
//! digest of its textual form before it reaches any other component. The
//! digest is stable across runs and hosts so unique-visitor sets merge
//! correctly between nodes.

use base64::{prelude::BASE64_STANDARD, Engine};
use sha3::{Digest, Sha3_512};

use crate::ingest::event::IpFamily;

/// Maps a textual IP address to `(hash, family)`.
///
/// Family is [`IpFamily::V6`] iff the string contains a `:`.
pub fn anonymize(ip: &str) -> (String, IpFamily) {
    let family = if ip.contains(':') {
        IpFamily::V6
    } else {
        IpFamily::V4
    };

    let digest = Sha3_512::digest(ip.as_bytes());
    (BASE64_STANDARD.encode(digest), family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let (a, _) = anonymize("203.0.113.7");
        let (b, _) = anonymize("203.0.113.7");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_inputs_distinct_hashes() {
        let (a, _) = anonymize("203.0.113.7");
        let (b, _) = anonymize("203.0.113.8");
        assert_ne!(a, b);
    }

    #[test]
    fn test_family_v4() {
        let (_, family) = anonymize("192.0.2.1");
        assert_eq!(family, IpFamily::V4);
    }

    #[test]
    fn test_family_v6() {
        let (_, family) = anonymize("2001:db8::1");
        assert_eq!(family, IpFamily::V6);
    }

    #[test]
    fn test_hash_is_base64_of_512_bits() {
        // 64 digest bytes encode to 88 base64 characters (with padding).
        let (hash, _) = anonymize("198.51.100.23");
        assert_eq!(hash.len(), 88);
        assert!(hash.ends_with('='));
    }

    #[test]
    fn test_hash_does_not_leak_input() {
        let (hash, _) = anonymize("198.51.100.23");
        assert!(!hash.contains("198.51.100.23"));
    }
}
