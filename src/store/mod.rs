//! Snapshot persistence.
//!
//! One snapshot per `(protocol, day, host)`, named
//! `<protocol>_<YYYYMMDD>.<host>.json.gz`: a gzip-compressed JSON document
//! in the [`DayStats`](crate::stats::DayStats) shape. Writes go through a
//! `.tmp` file followed by a rename, so a crash leaves either the old
//! snapshot or nothing, never truncated output. The watermark (last
//! processed day per protocol) is derived from the filenames themselves;
//! `YYYYMMDD` is fixed-width, so lexical order coincides with
//! chronological order.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::ingest::event::Protocol;
use crate::stats::DayStats;

/// One snapshot loaded from disk, tagged with its provenance.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub protocol: Protocol,
    pub path: PathBuf,
    /// Raw JSON document; unknown keys survive untouched.
    pub data: serde_json::Value,
}

/// Reads and writes the per-host snapshot directory.
pub struct SnapshotStore {
    dir: PathBuf,
    host: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            host: host.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists every day bucket, ascending by day key.
    pub fn write_all(&self, days: &BTreeMap<String, DayStats>) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating stats dir {}", self.dir.display()))?;

        for (day_key, stats) in days {
            let path = self.dir.join(format!("{day_key}.{}.json.gz", self.host));
            let json = serde_json::to_vec(stats)
                .with_context(|| format!("serializing {day_key}"))?;
            write_gz_atomic(&path, &json)?;
        }

        Ok(())
    }

    /// Largest `YYYYMMDD` with a local snapshot for `protocol`, else 0.
    pub fn watermark(&self, protocol: Protocol) -> Result<u32> {
        let pattern = format!(
            "{}/{}_*.{}.json.gz",
            self.dir.display(),
            protocol,
            self.host
        );

        let mut names: Vec<String> = Vec::new();
        for entry in glob::glob(&pattern).context("bad snapshot glob")? {
            let path = entry.context("reading snapshot glob match")?;
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }

        names.sort();

        let Some(latest) = names.last() else {
            return Ok(0);
        };

        Ok(date_from_name(latest, protocol).unwrap_or(0))
    }

    /// Every snapshot for `date`, any protocol, any host, each tagged with
    /// `(protocol, path)` both in the returned struct and injected into the
    /// JSON document itself (peers may replicate files that already carry
    /// these tags; readers ignore them).
    pub fn load(&self, date: u32) -> Result<Vec<Snapshot>> {
        let pattern = format!("{}/*_{date:08}.*.json.gz", self.dir.display());

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in glob::glob(&pattern).context("bad snapshot glob")? {
            paths.push(entry.context("reading snapshot glob match")?);
        }
        paths.sort();

        let mut snapshots = Vec::new();
        for path in paths {
            let Some(protocol) = protocol_from_path(&path) else {
                continue;
            };

            let file = File::open(&path)
                .with_context(|| format!("opening snapshot {}", path.display()))?;
            let mut data: serde_json::Value =
                serde_json::from_reader(GzDecoder::new(file))
                    .with_context(|| format!("decoding snapshot {}", path.display()))?;

            if let Some(map) = data.as_object_mut() {
                map.insert(
                    "protocol".to_string(),
                    serde_json::Value::String(protocol.to_string()),
                );
                map.insert(
                    "path".to_string(),
                    serde_json::Value::String(path.display().to_string()),
                );
            }

            snapshots.push(Snapshot {
                protocol,
                path,
                data,
            });
        }

        Ok(snapshots)
    }
}

/// Extracts the 8-digit day from `<protocol>_<YYYYMMDD>.<host>.json.gz`.
fn date_from_name(name: &str, protocol: Protocol) -> Option<u32> {
    let rest = name.strip_prefix(protocol.as_str())?.strip_prefix('_')?;
    let digits = rest.get(..8)?;
    digits.parse().ok()
}

fn protocol_from_path(path: &Path) -> Option<Protocol> {
    let name = path.file_name()?.to_str()?;
    let (prefix, _) = name.split_once('_')?;
    Protocol::from_str(prefix)
}

/// Writes `bytes` to `path` via `<path>.tmp` + rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);

    let mut file = File::create(&tmp)
        .with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing {}", tmp.display()))?;
    drop(file);

    fs::rename(&tmp, path).with_context(|| {
        format!("renaming {} to {}", tmp.display(), path.display())
    })
}

/// Gzip-compresses `bytes`, then writes them atomically.
pub fn write_gz_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .with_context(|| format!("compressing {}", path.display()))?;
    let compressed = encoder
        .finish()
        .with_context(|| format!("compressing {}", path.display()))?;

    write_atomic(path, &compressed)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
