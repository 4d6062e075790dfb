//! Request filtering.
//!
//! Every event passes three gates in order: the sticky block set (an IP
//! hash once blocked stays blocked for the rest of the run), the odd
//! pattern list (operator-supplied substrings matched against the request
//! path), and the per-second rate cap (at most one request per IP hash per
//! log-time second). All state is private to one ingest run; nothing is
//! persisted.
//!
//! Decisions are recorded in an append-only text log, one line per subject
//! per run, so the log stays compact across large ingests.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::ingest::event::Event;

/// Outcome of a filter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

/// Severity of a filter-log line.
#[derive(Debug, Clone, Copy)]
enum Severity {
    Ok,
    Warn,
}

impl Severity {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
        }
    }
}

/// Append-only decision log, deduplicated by subject within a run.
struct DecisionLog {
    file: File,
    seen: HashSet<String>,
}

impl DecisionLog {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening filter log {}", path.display()))?;

        Ok(Self {
            file,
            seen: HashSet::new(),
        })
    }

    /// Writes `<severity>: <subject> <message>` the first time a subject is
    /// seen; later occurrences are dropped. Write errors are fatal.
    fn record(&mut self, severity: Severity, subject: &str, message: &str) -> Result<()> {
        if !self.seen.insert(subject.to_string()) {
            return Ok(());
        }

        writeln!(self.file, "{}: {} {}", severity.as_str(), subject, message)
            .context("writing filter log")?;

        Ok(())
    }
}

/// Per-run request filter. Owns its block set and rate state.
pub struct Filter {
    patterns: Vec<String>,
    blocked: HashSet<String>,
    last_time: String,
    per_second: HashMap<String, u32>,
    log: DecisionLog,
}

impl Filter {
    /// Loads the odd-pattern list and opens the decision log. An unreadable
    /// patterns file is an operator error and fatal; an empty list is legal.
    pub fn new(patterns_path: &Path, log_path: &Path) -> Result<Self> {
        Ok(Self {
            patterns: load_patterns(patterns_path)?,
            blocked: HashSet::new(),
            last_time: String::new(),
            per_second: HashMap::new(),
            log: DecisionLog::open(log_path)?,
        })
    }

    /// Decides whether `event` is counted or filtered.
    pub fn check(&mut self, event: &Event) -> Result<Verdict> {
        if self.blocked.contains(&event.ip_hash) {
            self.log
                .record(Severity::Warn, &event.ip_hash, "blocked earlier this run")?;
            return Ok(Verdict::Block);
        }

        if let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| event.uri_path.contains(p.as_str()))
        {
            let message = format!("matches odd pattern {pattern:?}");
            self.blocked.insert(event.ip_hash.clone());
            self.log.record(Severity::Warn, &event.uri_path, &message)?;
            return Ok(Verdict::Block);
        }

        // Log order is monotone in time within a file; a new time string
        // opens a fresh one-second window.
        if event.time != self.last_time {
            self.last_time = event.time.clone();
            self.per_second.clear();
        }

        let hits = self.per_second.entry(event.ip_hash.clone()).or_insert(0);
        *hits += 1;
        if *hits > 1 {
            self.blocked.insert(event.ip_hash.clone());
            self.log.record(
                Severity::Warn,
                &event.ip_hash,
                "more than one request per second",
            )?;
            return Ok(Verdict::Block);
        }

        self.log.record(Severity::Ok, &event.uri_path, "allowed")?;
        Ok(Verdict::Allow)
    }

    /// IP hashes blocked so far in this run.
    pub fn blocked(&self) -> &HashSet<String> {
        &self.blocked
    }
}

/// One substring pattern per line; blank lines and lines whose first
/// non-blank character is `#` are ignored. No regex semantics.
fn load_patterns(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .with_context(|| format!("opening patterns file {}", path.display()))?;

    let mut patterns = Vec::new();
    for line in BufReader::new(file).lines() {
        let line =
            line.with_context(|| format!("reading patterns file {}", path.display()))?;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        patterns.push(line);
    }

    Ok(patterns)
}
