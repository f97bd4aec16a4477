use std::{fs, path::Path, time::Duration};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Shortest supported check interval, in seconds.
pub const MIN_INTERVAL_SECS: u64 = 5;
/// Longest supported check interval, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("site {url}: invalid url: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("site {url}: unsupported scheme {scheme:?}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("site {url}: invalid pattern: {source}")]
    InvalidPattern { url: String, source: regex::Error },
    #[error("no sites configured")]
    NoSites,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the local database file.
    pub path: String,
    /// Pool size; also the upper bound on concurrent batch writes.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Total per-request timeout enforced by the shared HTTP client.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: default_timeout_seconds() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatcherConfig {
    /// Number of results that triggers a flush to the database.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self { batch_size: default_batch_size() }
    }
}

fn default_max_connections() -> usize {
    8
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct RawSite {
    url: String,
    pattern: Option<String>,
    interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    database: DatabaseConfig,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    batcher: BatcherConfig,
    #[serde(default)]
    sites: Vec<RawSite>,
}

/// One monitored site. Immutable once built from configuration.
#[derive(Debug, Clone)]
pub struct SiteTarget {
    pub url: String,
    /// Pattern expected somewhere in the response body, if configured.
    pub pattern: Option<Regex>,
    /// Configured interval, before clamping.
    pub interval_seconds: u64,
}

impl SiteTarget {
    /// Configured interval clamped to the supported range.
    pub fn effective_interval_seconds(&self) -> u64 {
        self.interval_seconds.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
    }

    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs(self.effective_interval_seconds())
    }
}

/// Validated runtime configuration.
#[derive(Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub batcher: BatcherConfig,
    pub sites: Vec<SiteTarget>,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let raw_string = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: origin.clone(), source })?;

        Self::from_toml_str(&raw_string, &origin)
    }

    fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(raw)
            .map_err(|source| ConfigError::Parse { path: origin.to_string(), source })?;

        if raw.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut sites = Vec::with_capacity(raw.sites.len());
        for site in raw.sites {
            sites.push(validate_site(site)?);
        }

        Ok(Self {
            database: raw.database,
            http: raw.http,
            batcher: raw.batcher,
            sites,
        })
    }
}

fn validate_site(raw: RawSite) -> Result<SiteTarget, ConfigError> {
    let parsed = Url::parse(&raw.url)
        .map_err(|source| ConfigError::InvalidUrl { url: raw.url.clone(), source })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::UnsupportedScheme {
                url: raw.url,
                scheme: other.to_string(),
            });
        }
    }

    let pattern = match raw.pattern {
        Some(pattern) => Some(Regex::new(&pattern).map_err(|source| {
            ConfigError::InvalidPattern { url: raw.url.clone(), source }
        })?),
        None => None,
    };

    Ok(SiteTarget {
        url: raw.url,
        pattern,
        interval_seconds: raw.interval_seconds,
    })
}
