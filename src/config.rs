use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the foostats pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding the per-(protocol, day, host) snapshots.
    #[serde(default = "default_stats_dir")]
    pub stats_dir: PathBuf,

    /// Directory the rendered gemtext reports are written to.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Odd-pattern blocklist, one substring per line.
    #[serde(default = "default_patterns_file")]
    pub patterns_file: PathBuf,

    /// Append-only filter decision log.
    #[serde(default = "default_filter_log")]
    pub filter_log: PathBuf,

    /// Short hostname used in snapshot filenames. Default: the local
    /// hostname up to the first dot.
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Glob over the rotated web access logs.
    #[serde(default = "default_web_log_glob")]
    pub web_log_glob: String,

    /// Glob over the rotated daemon logs carrying vger and relayd lines.
    #[serde(default = "default_gemini_log_glob")]
    pub gemini_log_glob: String,

    /// Peer hostnames whose snapshots are replicated here.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Replication tuning.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Replication tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// Per-request timeout. Default: 30s.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

// --- Default value functions ---

fn default_stats_dir() -> PathBuf {
    PathBuf::from("stats")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_patterns_file() -> PathBuf {
    PathBuf::from("patterns.txt")
}

fn default_filter_log() -> PathBuf {
    PathBuf::from("filter.log")
}

fn default_local_host() -> String {
    let name = gethostname::gethostname();
    let name = name.to_string_lossy();
    name.split('.').next().unwrap_or_default().to_string()
}

fn default_web_log_glob() -> String {
    "/var/www/logs/access.log*".to_string()
}

fn default_gemini_log_glob() -> String {
    "/var/log/daemon*".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            stats_dir: default_stats_dir(),
            report_dir: default_report_dir(),
            patterns_file: default_patterns_file(),
            filter_log: default_filter_log(),
            local_host: default_local_host(),
            web_log_glob: default_web_log_glob(),
            gemini_log_glob: default_gemini_log_glob(),
            peers: Vec::new(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.local_host.is_empty() {
            bail!("local_host is required");
        }

        if self.local_host.contains('.') {
            bail!("local_host must be a short hostname (no dots)");
        }

        if self.web_log_glob.is_empty() {
            bail!("web_log_glob is required");
        }

        if self.gemini_log_glob.is_empty() {
            bail!("gemini_log_glob is required");
        }

        if self.replication.timeout.is_zero() {
            bail!("replication.timeout must be positive");
        }

        Ok(())
    }
}
