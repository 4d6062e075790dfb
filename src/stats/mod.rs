//! Day-bucketed statistics.
//!
//! [`Aggregator`] owns the `(protocol, date)` keyed [`DayStats`] map for one
//! ingest run, plus the [`Filter`](crate::filter::Filter) that guards it.
//! Buckets are created lazily on the first event of a day and serialized to
//! snapshots at the end of the run; they are never mutated afterwards.

use std::collections::BTreeMap;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::filter::{Filter, Verdict};
use crate::ingest::event::Event;

lazy_static! {
    /// Atom feed endpoint, with or without a query/fragment suffix.
    static ref ATOM_FEED: Regex =
        Regex::new(r"^/gemfeed/atom\.xml(?:[?#].*)?$").unwrap();

    /// Gemfeed index endpoint, bare directory or explicit index page.
    static ref GEMFEED: Regex =
        Regex::new(r"^/gemfeed/(?:index\.gmi)?(?:[?#].*)?$").unwrap();
}

/// Unique-visitor sets for the two feed endpoints. Hit counts per IP hash
/// are kept so merging across hosts stays additive; only set cardinality is
/// used downstream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedIps {
    #[serde(default)]
    pub atom_feed: BTreeMap<String, u64>,
    #[serde(default)]
    pub gemfeed: BTreeMap<String, u64>,
}

/// Unique-visitor sets per host and per page URL.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageIps {
    /// host → (ip hash → hits)
    #[serde(default)]
    pub hosts: BTreeMap<String, BTreeMap<String, u64>>,
    /// host + uri path → (ip hash → hits)
    #[serde(default)]
    pub urls: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Accumulated statistics for one `(protocol, date)` bucket.
///
/// `count` carries the keys `filtered`, `web`, `gemini`, `v4` and `v6`;
/// unknown keys found in peer snapshots are preserved verbatim by the
/// merger but never produced here.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    #[serde(default)]
    pub count: BTreeMap<String, u64>,
    #[serde(default)]
    pub feed_ips: FeedIps,
    #[serde(default)]
    pub page_ips: PageIps,
}

/// Owns the day map and the filter for one ingest run.
pub struct Aggregator {
    days: BTreeMap<String, DayStats>,
    filter: Filter,
}

impl Aggregator {
    pub fn new(filter: Filter) -> Self {
        Self {
            days: BTreeMap::new(),
            filter,
        }
    }

    /// Folds one event into its day bucket.
    ///
    /// A rejected event only bumps `count.filtered`. An accepted event
    /// contributes to the protocol and family counters exactly once, then
    /// to either a feed set or the page sets, never both: feed endpoints
    /// short-circuit page accounting.
    pub fn add(&mut self, event: &Event) -> Result<()> {
        let verdict = self.filter.check(event)?;

        // `filtered` is always present so a clean day reports zero.
        let day = self.days.entry(event.day_key()).or_insert_with(|| {
            let mut day = DayStats::default();
            day.count.insert("filtered".to_string(), 0);
            day
        });

        if verdict == Verdict::Block {
            *day.count.entry("filtered".to_string()).or_insert(0) += 1;
            return Ok(());
        }

        *day.count
            .entry(event.protocol.as_str().to_string())
            .or_insert(0) += 1;
        *day.count
            .entry(event.ip_family.as_str().to_string())
            .or_insert(0) += 1;

        if ATOM_FEED.is_match(&event.uri_path) {
            *day.feed_ips
                .atom_feed
                .entry(event.ip_hash.clone())
                .or_insert(0) += 1;
            return Ok(());
        }

        if GEMFEED.is_match(&event.uri_path) {
            *day.feed_ips
                .gemfeed
                .entry(event.ip_hash.clone())
                .or_insert(0) += 1;
            return Ok(());
        }

        if event.uri_path.ends_with(".html") || event.uri_path.ends_with(".gmi") {
            *day.page_ips
                .hosts
                .entry(event.host.clone())
                .or_default()
                .entry(event.ip_hash.clone())
                .or_insert(0) += 1;

            let url = format!("{}{}", event.host, event.uri_path);
            *day.page_ips
                .urls
                .entry(url)
                .or_default()
                .entry(event.ip_hash.clone())
                .or_insert(0) += 1;
        }

        Ok(())
    }

    /// The day buckets accumulated so far, keyed `<protocol>_<YYYYMMDD>`,
    /// in ascending key order.
    pub fn days(&self) -> &BTreeMap<String, DayStats> {
        &self.days
    }
}
