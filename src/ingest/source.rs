//! Streaming reader over rotated access-log files.
//!
//! Expands a glob pattern, orders matches newest-first by modification time
//! (rotation moves older data into `.N` / `.N.gz` members), transparently
//! decompresses gzip members, and hands each surviving line to a consumer as
//! whitespace-split fields. A consumer may signal [`Flow::Stop`]; the source
//! then finishes the current file but opens no further file, which is how
//! the watermark cutoff terminates ingest early.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local};
use flate2::read::GzDecoder;

/// Rotation marker written into the log stream by newsyslog; not a request.
const ROTATION_MARKER: &str = "logfile turned over";

/// Consumer verdict for a single log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Finish the current file, then stop. Older files stay unopened.
    Stop,
}

/// A glob-defined set of log files streamed newest-first.
pub struct LogSource {
    pattern: String,
}

impl LogSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Streams every line of every matched file to `consumer`.
    ///
    /// The consumer receives the four-digit year of the file's modification
    /// time (Gemini log lines carry only month and day) and the line split
    /// on runs of whitespace. Any open or read error is fatal: a partially
    /// ingested day would persist wrong counters.
    pub fn for_each<F>(&self, mut consumer: F) -> Result<()>
    where
        F: FnMut(i32, &[&str]) -> Result<Flow>,
    {
        let mut stop = false;

        for path in self.expand()? {
            if stop {
                break;
            }

            let year = file_year(&path)?;
            let reader = open_log(&path)?;

            for line in reader.lines() {
                let line =
                    line.with_context(|| format!("reading {}", path.display()))?;

                if line.contains(ROTATION_MARKER) {
                    continue;
                }

                let fields: Vec<&str> = line.split_whitespace().collect();
                if consumer(year, &fields)? == Flow::Stop {
                    stop = true;
                }
            }
        }

        Ok(())
    }

    /// Expands the glob pattern, newest modification time first.
    fn expand(&self) -> Result<Vec<PathBuf>> {
        let paths = glob::glob(&self.pattern)
            .with_context(|| format!("bad log glob {:?}", self.pattern))?;

        let mut dated = Vec::new();
        for entry in paths {
            let path = entry.context("reading glob match")?;
            let modified = file_mtime(&path)?;
            dated.push((modified, path));
        }

        dated.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(dated.into_iter().map(|(_, path)| path).collect())
    }
}

/// Opens a log file, decompressing when the extension is `.gz`.
fn open_log(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("opening {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn file_mtime(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?;
    meta.modified()
        .with_context(|| format!("reading mtime of {}", path.display()))
}

/// Four-digit local year of the file's modification time.
fn file_year(path: &Path) -> Result<i32> {
    let mtime = file_mtime(path)?;
    Ok(DateTime::<Local>::from(mtime).year())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).expect("create log file");
        file.write_all(contents.as_bytes()).expect("write log file");
        path
    }

    fn write_gz(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).expect("create gz file");
        let mut enc =
            flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(contents.as_bytes()).expect("write gz file");
        enc.finish().expect("finish gz file");
        path
    }

    fn collect_lines(pattern: &str) -> Vec<Vec<String>> {
        let mut lines = Vec::new();
        LogSource::new(pattern)
            .for_each(|_, fields| {
                lines.push(fields.iter().map(|f| f.to_string()).collect());
                Ok(Flow::Continue)
            })
            .expect("for_each");
        lines
    }

    #[test]
    fn test_streams_whitespace_split_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "access.log", "a  b\tc\nd e\n");

        let lines = collect_lines(&format!("{}/access.log", dir.path().display()));
        assert_eq!(lines, vec![vec!["a", "b", "c"], vec!["d", "e"]]);
    }

    #[test]
    fn test_decompresses_gz_members() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_gz(dir.path(), "access.log.1.gz", "x y z\n");

        let lines = collect_lines(&format!("{}/access.log*", dir.path().display()));
        assert_eq!(lines, vec![vec!["x", "y", "z"]]);
    }

    #[test]
    fn test_skips_rotation_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(
            dir.path(),
            "access.log",
            "before 1\nfoo logfile turned over bar\nafter 2\n",
        );

        let lines = collect_lines(&format!("{}/access.log", dir.path().display()));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0][0], "before");
        assert_eq!(lines[1][0], "after");
    }

    #[test]
    fn test_newest_file_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "access.log.1", "old 1\n");
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(dir.path(), "access.log", "new 1\n");

        let lines = collect_lines(&format!("{}/access.log*", dir.path().display()));
        assert_eq!(lines[0][0], "new");
        assert_eq!(lines[1][0], "old");
    }

    #[test]
    fn test_stop_finishes_current_file_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "access.log.1", "older 1\n");
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(dir.path(), "access.log", "first 1\nsecond 2\nthird 3\n");

        let mut seen = Vec::new();
        LogSource::new(format!("{}/access.log*", dir.path().display()))
            .for_each(|_, fields| {
                seen.push(fields[0].to_string());
                if fields[0] == "first" {
                    Ok(Flow::Stop)
                } else {
                    Ok(Flow::Continue)
                }
            })
            .expect("for_each");

        // The current file runs to completion; the older file never opens.
        assert_eq!(seen, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_consumer_error_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "access.log", "a 1\n");

        let result = LogSource::new(format!("{}/access.log", dir.path().display()))
            .for_each(|_, _| anyhow::bail!("boom"));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_year_matches_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "access.log", "a 1\n");

        let year = file_year(&path).expect("file year");
        assert_eq!(year, Local::now().year());
    }

    #[test]
    fn test_empty_glob_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lines = collect_lines(&format!("{}/nothing*", dir.path().display()));
        assert!(lines.is_empty());
    }
}
