//! Cross-host, cross-protocol merging of daily snapshots.
//!
//! For each day in the sliding window, every snapshot is loaded regardless
//! of protocol and host, counters are summed, unique-IP maps are unioned
//! per slice, and the Gemini and HTTP forms of the same page (`.gmi` vs
//! `.html`) are collapsed into one entry. Unique-IP maps leave this module
//! as plain cardinalities; individual hashes never reach the renderer.
//!
//! Merging is polymorphic over value shapes: numbers add, mappings recurse,
//! anything else is schema drift between node versions and fails loudly.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::ingest::event::Protocol;
use crate::store::{Snapshot, SnapshotStore};

/// The report window: today and the 30 days before it.
pub const WINDOW_DAYS: u64 = 31;

/// Fixed key set of the merged feed-reader cardinalities.
pub const FEED_KEYS: [&str; 5] = [
    "Total",
    "Gemini Gemfeed",
    "Gemini Atom",
    "Web Gemfeed",
    "Web Atom",
];

/// Errors raised while combining snapshot values.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("incompatible merge under {key:?}: number meets mapping")]
    TypeMismatch { key: String },

    #[error("unsupported value under {key:?}: expected number or mapping")]
    Unsupported { key: String },
}

/// A snapshot value: a counter leaf or a nested mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(u64),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Empty mapping, the identity element of merging.
    pub fn empty() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Converts a JSON subtree, rejecting anything that is not a
    /// non-negative integer or an object.
    pub fn from_json(key: &str, json: &Json) -> Result<Self, MergeError> {
        match json {
            Json::Number(n) => n
                .as_u64()
                .map(Value::Number)
                .ok_or_else(|| MergeError::Unsupported {
                    key: key.to_string(),
                }),
            Json::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Value::from_json(k, v)?);
                }
                Ok(Value::Map(out))
            }
            _ => Err(MergeError::Unsupported {
                key: key.to_string(),
            }),
        }
    }

    /// Folds `other` into `self`: numbers add, mappings recurse.
    pub fn merge(&mut self, other: Value, key: &str) -> Result<(), MergeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                *a += b;
                Ok(())
            }
            (Value::Map(a), Value::Map(b)) => {
                for (k, v) in b {
                    match a.get_mut(&k) {
                        Some(held) => held.merge(v, &k)?,
                        None => {
                            a.insert(k, v);
                        }
                    }
                }
                Ok(())
            }
            _ => Err(MergeError::TypeMismatch {
                key: key.to_string(),
            }),
        }
    }

    /// The key set of a mapping; a number has none.
    fn keys(&self) -> Vec<&String> {
        match self {
            Value::Map(map) => map.keys().collect(),
            Value::Number(_) => Vec::new(),
        }
    }

    /// Mapping cardinality.
    fn len(&self) -> u64 {
        match self {
            Value::Map(map) => map.len() as u64,
            Value::Number(_) => 0,
        }
    }
}

/// Merged per-page unique-visitor cardinalities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedPages {
    /// host → unique visitors
    pub hosts: BTreeMap<String, u64>,
    /// host + path → unique visitors, `.gmi` collapsed into `.html`
    pub urls: BTreeMap<String, u64>,
}

/// The cross-host, cross-protocol view of one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedDay {
    /// Summed counters across all hosts and both protocols.
    pub count: BTreeMap<String, u64>,
    /// Feed-reader cardinalities under the fixed [`FEED_KEYS`].
    pub feed_ips: BTreeMap<String, u64>,
    pub page_ips: MergedPages,
}

/// Merges every day of the report window, newest last. Days without any
/// snapshot are absent from the result.
pub fn merge_window(
    store: &SnapshotStore,
    today: NaiveDate,
) -> Result<BTreeMap<u32, MergedDay>> {
    let mut days = BTreeMap::new();

    for back in 0..WINDOW_DAYS {
        let Some(date) = today.checked_sub_days(Days::new(back)) else {
            continue;
        };
        let date = date_key(date);

        if let Some(merged) = merge_day(store, date)? {
            days.insert(date, merged);
        }
    }

    Ok(days)
}

/// Merges all snapshots of one day, or `None` when the day has none.
pub fn merge_day(store: &SnapshotStore, date: u32) -> Result<Option<MergedDay>> {
    let snapshots = store.load(date)?;
    if snapshots.is_empty() {
        return Ok(None);
    }

    let count = merge_counters(&snapshots)
        .with_context(|| format!("merging counters for {date}"))?;
    let feed_ips = merge_feeds(&snapshots)
        .with_context(|| format!("merging feed sets for {date}"))?;
    let page_ips = merge_pages(&snapshots)
        .with_context(|| format!("merging page sets for {date}"))?;

    Ok(Some(MergedDay {
        count,
        feed_ips,
        page_ips,
    }))
}

fn merge_counters(snapshots: &[Snapshot]) -> Result<BTreeMap<String, u64>> {
    let mut acc = Value::empty();
    for snap in snapshots {
        if let Some(count) = snap.data.get("count") {
            acc.merge(Value::from_json("count", count)?, "count")?;
        }
    }

    let Value::Map(map) = acc else {
        return Ok(BTreeMap::new());
    };

    let mut out = BTreeMap::new();
    for (key, value) in map {
        match value {
            Value::Number(n) => {
                out.insert(key, n);
            }
            Value::Map(_) => {
                return Err(MergeError::TypeMismatch { key }.into());
            }
        }
    }

    Ok(out)
}

fn merge_feeds(snapshots: &[Snapshot]) -> Result<BTreeMap<String, u64>> {
    // Union within (protocol, bucket) first: the same hash seen by two
    // hosts is one visitor, not two.
    let mut gemini_atom = Value::empty();
    let mut gemini_gemfeed = Value::empty();
    let mut web_atom = Value::empty();
    let mut web_gemfeed = Value::empty();

    for snap in snapshots {
        let (atom, gemfeed) = match snap.protocol {
            Protocol::Gemini => (&mut gemini_atom, &mut gemini_gemfeed),
            Protocol::Web => (&mut web_atom, &mut web_gemfeed),
        };

        if let Some(ips) = snap.data.pointer("/feed_ips/atom_feed") {
            atom.merge(Value::from_json("atom_feed", ips)?, "atom_feed")?;
        }
        if let Some(ips) = snap.data.pointer("/feed_ips/gemfeed") {
            gemfeed.merge(Value::from_json("gemfeed", ips)?, "gemfeed")?;
        }
    }

    let total: HashSet<&String> = [&gemini_atom, &gemini_gemfeed, &web_atom, &web_gemfeed]
        .into_iter()
        .flat_map(Value::keys)
        .collect();

    let mut out = BTreeMap::new();
    out.insert("Total".to_string(), total.len() as u64);
    out.insert("Gemini Gemfeed".to_string(), gemini_gemfeed.len());
    out.insert("Gemini Atom".to_string(), gemini_atom.len());
    out.insert("Web Gemfeed".to_string(), web_gemfeed.len());
    out.insert("Web Atom".to_string(), web_atom.len());

    Ok(out)
}

fn merge_pages(snapshots: &[Snapshot]) -> Result<MergedPages> {
    let mut hosts = Value::empty();
    let mut urls = Value::empty();

    for snap in snapshots {
        if let Some(by_host) = snap.data.pointer("/page_ips/hosts") {
            hosts.merge(Value::from_json("hosts", by_host)?, "hosts")?;
        }

        if let Some(by_url) = snap.data.pointer("/page_ips/urls") {
            let by_url = Value::from_json("urls", by_url)?;
            urls.merge(normalize_urls(by_url)?, "urls")?;
        }
    }

    Ok(MergedPages {
        hosts: cardinalities(hosts)?,
        urls: cardinalities(urls)?,
    })
}

/// Rewrites a trailing `.gmi` to `.html` on every URL key, so the Gemini
/// and HTTP forms of a page land in the same unique-visitor union.
fn normalize_urls(value: Value) -> Result<Value, MergeError> {
    let map = match value {
        Value::Map(map) => map,
        number @ Value::Number(_) => return Ok(number),
    };

    let mut out: BTreeMap<String, Value> = BTreeMap::new();
    for (url, ips) in map {
        let url = match url.strip_suffix(".gmi") {
            Some(stem) => format!("{stem}.html"),
            None => url,
        };

        match out.get_mut(&url) {
            // Same page seen under both forms within one snapshot.
            Some(held) => held.merge(ips, &url)?,
            None => {
                out.insert(url, ips);
            }
        }
    }

    Ok(Value::Map(out))
}

/// Replaces each per-key IP map with its cardinality.
fn cardinalities(value: Value) -> Result<BTreeMap<String, u64>> {
    let Value::Map(map) = value else {
        return Ok(BTreeMap::new());
    };

    let mut out = BTreeMap::new();
    for (key, ips) in map {
        match ips {
            Value::Map(set) => {
                out.insert(key, set.len() as u64);
            }
            Value::Number(_) => {
                return Err(MergeError::TypeMismatch { key }.into());
            }
        }
    }

    Ok(out)
}

/// `YYYYMMDD` of a calendar date.
pub fn date_key(date: NaiveDate) -> u32 {
    use chrono::Datelike;
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: u64) -> Json {
        Json::Number(n.into())
    }

    #[test]
    fn test_merge_numbers_add() {
        let mut a = Value::from_json("x", &number(2)).expect("from_json");
        let b = Value::from_json("x", &number(3)).expect("from_json");
        a.merge(b, "x").expect("merge");
        assert_eq!(a, Value::Number(5));
    }

    #[test]
    fn test_merge_maps_recurse() {
        let left: Json = serde_json::json!({"a": {"h1": 1}, "b": 2});
        let right: Json = serde_json::json!({"a": {"h1": 1, "h2": 4}, "c": 7});

        let mut acc = Value::from_json("root", &left).expect("from_json");
        acc.merge(Value::from_json("root", &right).expect("from_json"), "root")
            .expect("merge");

        let expected: Json = serde_json::json!({"a": {"h1": 2, "h2": 4}, "b": 2, "c": 7});
        assert_eq!(acc, Value::from_json("root", &expected).expect("from_json"));
    }

    #[test]
    fn test_merge_number_meets_map_is_fatal() {
        let mut a = Value::Number(1);
        let err = a.merge(Value::empty(), "count").expect_err("mismatch");
        assert!(err.to_string().contains("incompatible merge"));
    }

    #[test]
    fn test_from_json_rejects_strings() {
        let err = Value::from_json("path", &Json::String("x".into())).expect_err("string");
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_normalize_rewrites_gmi_suffix() {
        let raw: Json = serde_json::json!({
            "example.org/post.gmi": {"H1": 1},
            "example.org/other.html": {"H2": 1},
        });
        let normalized = normalize_urls(Value::from_json("urls", &raw).expect("from_json"))
            .expect("normalize");

        let Value::Map(map) = normalized else {
            panic!("expected map");
        };
        assert!(map.contains_key("example.org/post.html"));
        assert!(map.contains_key("example.org/other.html"));
        assert!(!map.contains_key("example.org/post.gmi"));
    }

    #[test]
    fn test_normalize_merges_both_forms() {
        let raw: Json = serde_json::json!({
            "example.org/post.gmi": {"H1": 1},
            "example.org/post.html": {"H1": 2, "H2": 1},
        });
        let normalized = normalize_urls(Value::from_json("urls", &raw).expect("from_json"))
            .expect("normalize");
        let cards = cardinalities(normalized).expect("cardinalities");
        assert_eq!(cards["example.org/post.html"], 2);
    }

    #[test]
    fn test_date_key() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).expect("date");
        assert_eq!(date_key(date), 20250201);
    }

    #[test]
    fn test_feed_keys_are_fixed() {
        assert_eq!(
            FEED_KEYS,
            [
                "Total",
                "Gemini Gemfeed",
                "Gemini Atom",
                "Web Gemfeed",
                "Web Atom"
            ]
        );
    }
}
