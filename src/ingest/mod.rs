//! The ingest phase: raw log lines → events → filter → day buckets →
//! snapshots.
//!
//! A single pull loop per protocol drives the parsers, which push events
//! into one shared [`Aggregator`]: filter decisions (including the sticky
//! block set) span both protocols within a run. The watermark read at
//! phase start bounds how far back into rotated logs the run reaches, so
//! a re-run is idempotent at the day level.

pub mod event;
pub mod gemini;
pub mod source;
pub mod web;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::filter::Filter;
use crate::stats::Aggregator;
use crate::store::SnapshotStore;

use self::event::Protocol;
use self::gemini::GeminiParser;
use self::source::LogSource;
use self::web::WebParser;

/// Runs one full ingest pass and persists the resulting snapshots.
pub fn run(cfg: &Config) -> Result<()> {
    let store = SnapshotStore::new(&cfg.stats_dir, &cfg.local_host);
    let filter = Filter::new(&cfg.patterns_file, &cfg.filter_log)
        .context("setting up request filter")?;
    let mut aggregator = Aggregator::new(filter);

    let watermark = store.watermark(Protocol::Web)?;
    info!(watermark, glob = %cfg.web_log_glob, "ingesting web logs");

    let web = WebParser::new(watermark);
    LogSource::new(&cfg.web_log_glob)
        .for_each(|_, fields| {
            let (event, flow) = web.parse(fields);
            if let Some(event) = event {
                aggregator.add(&event)?;
            }
            Ok(flow)
        })
        .context("ingesting web logs")?;

    let watermark = store.watermark(Protocol::Gemini)?;
    info!(watermark, glob = %cfg.gemini_log_glob, "ingesting gemini logs");

    let mut gemini = GeminiParser::new(watermark);
    LogSource::new(&cfg.gemini_log_glob)
        .for_each(|file_year, fields| {
            let (event, flow) = gemini.parse(file_year, fields);
            if let Some(event) = event {
                aggregator.add(&event)?;
            }
            Ok(flow)
        })
        .context("ingesting gemini logs")?;

    store
        .write_all(aggregator.days())
        .context("persisting snapshots")?;

    info!(days = aggregator.days().len(), "ingest finished");

    Ok(())
}
