//! Gemtext rendering of merged daily statistics.
//!
//! Two documents are produced per run: a detailed report for the newest
//! merged day and a rolling table over the whole window. Both are written
//! atomically so a crash never leaves a half-rendered page behind.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::merge::{MergedDay, FEED_KEYS};
use crate::store;

/// Counter keys in display order.
const COUNT_KEYS: [&str; 5] = ["web", "gemini", "v4", "v6", "filtered"];

/// Renders the full report for one day.
pub fn render_day(date: u32, day: &MergedDay) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Stats for {date}\n\n"));

    out.push_str("## Requests\n");
    for key in COUNT_KEYS {
        let value = day.count.get(key).copied().unwrap_or(0);
        out.push_str(&format!("* {key}: {value}\n"));
    }
    // Counters a newer peer version may have introduced.
    for (key, value) in &day.count {
        if !COUNT_KEYS.contains(&key.as_str()) {
            out.push_str(&format!("* {key}: {value}\n"));
        }
    }

    out.push_str("\n## Feed readers\n");
    for key in FEED_KEYS {
        let value = day.feed_ips.get(key).copied().unwrap_or(0);
        out.push_str(&format!("* {key}: {value}\n"));
    }

    out.push_str("\n## Visitors by host\n");
    for (host, visitors) in &day.page_ips.hosts {
        out.push_str(&format!("* {host}: {visitors}\n"));
    }

    out.push_str("\n## Visitors by page\n");
    for (url, visitors) in &day.page_ips.urls {
        out.push_str(&format!("* {url}: {visitors}\n"));
    }

    out
}

/// Renders the rolling window as one line per day, newest first.
pub fn render_window(days: &BTreeMap<u32, MergedDay>) -> String {
    let mut out = String::new();

    out.push_str("# Last 30 days\n\n");
    for (date, day) in days.iter().rev() {
        let web = day.count.get("web").copied().unwrap_or(0);
        let gemini = day.count.get("gemini").copied().unwrap_or(0);
        let filtered = day.count.get("filtered").copied().unwrap_or(0);
        let feeds = day.feed_ips.get("Total").copied().unwrap_or(0);

        out.push_str(&format!(
            "* {date}: web {web}, gemini {gemini}, feeds {feeds}, filtered {filtered}\n"
        ));
    }

    out
}

/// Writes `daily.gmi` (newest day) and `monthly.gmi` (rolling table).
pub fn write_reports(report_dir: &Path, days: &BTreeMap<u32, MergedDay>) -> Result<()> {
    std::fs::create_dir_all(report_dir)
        .with_context(|| format!("creating report dir {}", report_dir.display()))?;

    if let Some((date, newest)) = days.iter().next_back() {
        let daily = render_day(*date, newest);
        store::write_atomic(&report_dir.join("daily.gmi"), daily.as_bytes())
            .context("writing daily report")?;
    }

    let monthly = render_window(days);
    store::write_atomic(&report_dir.join("monthly.gmi"), monthly.as_bytes())
        .context("writing monthly report")?;

    Ok(())
}
