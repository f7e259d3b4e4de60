//! Configuration model.
//!
//! A single YAML file describes the whole fleet: hosts nested as
//! `team -> project -> name`, cache behaviour, a host filter regex, and the
//! limiter depth. Decoding is strict: unknown keys are an error, so typos in
//! a fleet config fail fast instead of silently dropping hosts.
//!
//! ```yaml
//! hosts:
//!   infra:
//!     main:
//!       alpha:
//!         url: https://gitlab.alpha.example.com
//!         token: glpat-...
//!         rate_limiter:
//!           enabled: false
//! cache:
//!   enabled: true
//!   size: 100MB
//!   compression: true
//!   ttl: 24h
//! filter: ".*"
//! threads: 100
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const APPLICATION_NAME: &str = "flotilla";

/// Default limiter depth.
pub const DEFAULT_THREADS: usize = 100;

/// Default on-disk cache cap.
pub const DEFAULT_CACHE_SIZE: &str = "100MB";

/// Nested host mapping: team -> project -> name -> host entry.
///
/// `BTreeMap` keeps iteration order stable, which in turn keeps the host
/// registry deterministic for a given config.
pub type HostMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, HostEntry>>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub hosts: HostMap,

    #[serde(default)]
    pub cache: CacheOptions,

    /// Regex applied to `team.project.name`; non-matching hosts are dropped
    /// at registry build.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Limiter depth: the maximum number of concurrent network calls.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    #[serde(default)]
    pub url: String,

    /// Optional dial override: the URL hostname resolves to this address
    /// instead of going through DNS.
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub rate_limiter: RateLimiterOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterOptions {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory. Defaults to `~/.cache/flotilla`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Human byte string, e.g. "100MB".
    #[serde(default = "default_cache_size")]
    pub size: String,

    #[serde(default = "default_true")]
    pub compression: bool,

    /// Freshness cap for cached responses.
    ///
    /// Absent: accept any cached response regardless of age (max-stale).
    /// Zero: never accept cached, always revalidate.
    /// Positive: accept cached responses younger than the cap.
    #[serde(default, deserialize_with = "de_opt_duration")]
    pub ttl: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            enabled: true,
            path: None,
            size: DEFAULT_CACHE_SIZE.to_string(),
            compression: true,
            ttl: None,
        }
    }
}

impl CacheOptions {
    /// The effective cache directory.
    pub fn base_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(p.clone()),
            None => default_cache_dir(),
        }
    }

    /// The effective size cap in bytes.
    pub fn max_size_bytes(&self) -> Result<u64> {
        let s = if self.size.is_empty() {
            DEFAULT_CACHE_SIZE
        } else {
            &self.size
        };
        parse_bytes(s)
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Default config file location: `~/.config/flotilla/config.yaml`.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.yaml"))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION_NAME)
        .ok_or_else(|| Error::config("cannot determine home directory"))
}

/// Default cache directory: `~/.cache/flotilla` on Linux.
pub fn default_cache_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.cache_dir().to_path_buf())
}

fn default_filter() -> String {
    ".*".to_string()
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> String {
    DEFAULT_CACHE_SIZE.to_string()
}

/// Parse a human byte string: "100MB", "1GiB", "4096".
///
/// Decimal suffixes are powers of 1000, binary suffixes powers of 1024.
pub fn parse_bytes(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| Error::config(format!("invalid size {s:?}")))?;

    let mult: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1000,
        "MB" => 1000 * 1000,
        "GB" => 1000 * 1000 * 1000,
        "TB" => 1000u64.pow(4),
        "KIB" => 1024,
        "MIB" => 1024 * 1024,
        "GIB" => 1024 * 1024 * 1024,
        "TIB" => 1024u64.pow(4),
        _ => return Err(Error::config(format!("invalid size suffix {s:?}"))),
    };

    Ok((value * mult as f64) as u64)
}

/// Parse a duration string: "30s", "10m", "24h", "1d", or plain seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| Error::config(format!("invalid duration {s:?}")))?;

    let secs: f64 = match suffix.trim() {
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return Err(Error::config(format!("invalid duration suffix {s:?}"))),
    };

    Ok(Duration::from_secs_f64(secs))
}

fn de_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(Raw::Seconds(n)) => Ok(Some(Duration::from_secs(n))),
        Some(Raw::Text(s)) => parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let yaml = r#"
hosts:
  infra:
    main:
      alpha:
        url: https://gitlab.alpha.example.com
        token: glpat-alpha
        rate_limiter:
          enabled: true
      beta:
        url: https://gitlab.beta.example.com
        ip: 10.0.0.7
        token: glpat-beta
cache:
  enabled: true
  size: 200MB
  compression: false
  ttl: 24h
filter: "infra\\..*"
threads: 50
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.threads, 50);
        assert_eq!(cfg.filter, "infra\\..*");
        assert!(!cfg.cache.compression);
        assert_eq!(cfg.cache.ttl, Some(Duration::from_secs(86400)));
        assert_eq!(cfg.cache.max_size_bytes().unwrap(), 200_000_000);

        let alpha = &cfg.hosts["infra"]["main"]["alpha"];
        assert!(alpha.rate_limiter.enabled);
        let beta = &cfg.hosts["infra"]["main"]["beta"];
        assert_eq!(beta.ip, "10.0.0.7");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "threads: 10\nbogus: true\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.threads, DEFAULT_THREADS);
        assert_eq!(cfg.filter, ".*");
        assert!(cfg.cache.enabled);
        assert!(cfg.cache.compression);
        assert!(cfg.cache.ttl.is_none());
        assert_eq!(cfg.cache.max_size_bytes().unwrap(), 100_000_000);
    }

    #[test]
    fn ttl_accepts_plain_seconds() {
        let cfg: Config = serde_yaml::from_str("cache:\n  ttl: 0\n").unwrap();
        assert_eq!(cfg.cache.ttl, Some(Duration::ZERO));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_bytes("4096").unwrap(), 4096);
        assert_eq!(parse_bytes("100MB").unwrap(), 100_000_000);
        assert_eq!(parse_bytes("1GiB").unwrap(), 1 << 30);
        assert_eq!(parse_bytes("1.5KB").unwrap(), 1500);
        assert!(parse_bytes("10XB").is_err());
        assert!(parse_bytes("").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("5fortnights").is_err());
    }
}
