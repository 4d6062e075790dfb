//! Best-effort pull replication of peer snapshots.
//!
//! For every peer and both protocols, the report window is walked newest
//! day first. The newest three files are re-fetched even when a local copy
//! exists (a peer may still be appending to its recent days); older files
//! are fetched only when absent. Any HTTP failure is logged and the file
//! skipped; the phase never aborts. Bodies are written through the same
//! atomic tmp-and-rename discipline as local snapshots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::ingest::event::Protocol;
use crate::merge::{date_key, WINDOW_DAYS};
use crate::store;

/// Newest days re-fetched unconditionally.
const REFRESH_DAYS: u64 = 3;

/// One planned transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// `<protocol>_<YYYYMMDD>.<peer>.json.gz`
    pub basename: String,
    pub dest: PathBuf,
}

/// Decides which of a peer's window files need a GET: the newest
/// [`REFRESH_DAYS`] unconditionally, the rest only when missing locally.
pub fn plan(stats_dir: &Path, peer: &str, today: NaiveDate) -> Vec<Transfer> {
    let mut transfers = Vec::new();

    for protocol in Protocol::all() {
        for back in 0..WINDOW_DAYS {
            let Some(day) = today.checked_sub_days(Days::new(back)) else {
                continue;
            };

            let basename = format!("{}_{}.{}.json.gz", protocol, date_key(day), peer);
            let dest = stats_dir.join(&basename);

            if back >= REFRESH_DAYS && dest.exists() {
                continue;
            }

            transfers.push(Transfer { basename, dest });
        }
    }

    transfers
}

/// Pulls peer snapshots into the local stats directory.
pub struct Replicator {
    client: reqwest::Client,
    stats_dir: PathBuf,
    peers: Vec<String>,
}

impl Replicator {
    pub fn new(
        stats_dir: impl Into<PathBuf>,
        peers: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            stats_dir: stats_dir.into(),
            peers,
        })
    }

    /// One pass over every peer. Per-file failures are logged and skipped.
    pub async fn run(&self, today: NaiveDate) -> Result<()> {
        std::fs::create_dir_all(&self.stats_dir).with_context(|| {
            format!("creating stats dir {}", self.stats_dir.display())
        })?;

        for peer in &self.peers {
            let transfers = plan(&self.stats_dir, peer, today);
            let window = Protocol::all().len() * WINDOW_DAYS as usize;
            let kept = window - transfers.len();
            let mut fetched = 0usize;
            let mut failed = 0usize;

            for transfer in transfers {
                match self.fetch(peer, &transfer).await {
                    Ok(()) => {
                        debug!(peer, file = %transfer.basename, "replicated snapshot");
                        fetched += 1;
                    }
                    Err(e) => {
                        warn!(peer, file = %transfer.basename, error = %e, "fetch failed");
                        failed += 1;
                    }
                }
            }

            info!(peer, fetched, kept, failed, "replication pass finished");
        }

        Ok(())
    }

    async fn fetch(&self, peer: &str, transfer: &Transfer) -> Result<()> {
        let url = format!("https://{}/foostats/{}", peer, transfer.basename);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("unexpected status {status} for {url}");
        }

        let body = resp
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?;

        store::write_atomic(&transfer.dest, &body)
            .with_context(|| format!("storing {}", transfer.dest.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 31).expect("date")
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").expect("touch");
    }

    #[test]
    fn test_empty_dir_plans_full_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transfers = plan(dir.path(), "beta", today());
        // 31 days for each of the two protocols.
        assert_eq!(transfers.len(), 62);
        assert_eq!(transfers[0].basename, "web_20250331.beta.json.gz");
    }

    #[test]
    fn test_recent_files_forced_older_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Local copies for D-0 through D-10.
        for back in 0..=10u64 {
            let day = today() - Days::new(back);
            touch(dir.path(), &format!("web_{}.beta.json.gz", date_key(day)));
            touch(dir.path(), &format!("gemini_{}.beta.json.gz", date_key(day)));
        }

        let transfers = plan(dir.path(), "beta", today());
        let web: Vec<&str> = transfers
            .iter()
            .filter(|t| t.basename.starts_with("web_"))
            .map(|t| t.basename.as_str())
            .collect();

        // D-0..D-2 overwritten, D-3..D-10 skipped, D-11..D-30 fetched.
        assert_eq!(web.len(), 3 + 20);
        assert!(web.contains(&"web_20250331.beta.json.gz"));
        assert!(web.contains(&"web_20250330.beta.json.gz"));
        assert!(web.contains(&"web_20250329.beta.json.gz"));
        assert!(!web.contains(&"web_20250328.beta.json.gz"));
        assert!(!web.contains(&"web_20250321.beta.json.gz"));
        assert!(web.contains(&"web_20250320.beta.json.gz"));
    }

    #[test]
    fn test_plan_is_per_peer() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A copy of another peer's file must not satisfy this peer.
        touch(dir.path(), "web_20250320.gamma.json.gz");

        let transfers = plan(dir.path(), "beta", today());
        assert!(transfers
            .iter()
            .any(|t| t.basename == "web_20250320.beta.json.gz"));
    }

    #[test]
    fn test_window_crosses_month_boundary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transfers = plan(dir.path(), "beta", today());
        assert!(transfers
            .iter()
            .any(|t| t.basename == "web_20250301.beta.json.gz"));
        // 31 days back from Mar 31 reaches Mar 1; Feb is outside the window.
        assert!(!transfers
            .iter()
            .any(|t| t.basename.starts_with("web_202502")));
    }
}
