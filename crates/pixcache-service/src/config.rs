use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::executor::ExecutorError;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for pixcache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "pixcache".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Sizing of the background worker pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of workers that are kept alive even when idle.
    ///
    /// Defaults to `16`.
    pub core_threads: usize,

    /// Hard ceiling of concurrently running workers.
    ///
    /// Workers beyond `core_threads` are only started once the admission queue is full.
    ///
    /// Defaults to `128`.
    pub max_threads: usize,

    /// Capacity of the FIFO admission queue.
    ///
    /// When the queue is full and no more workers may be started, the oldest queued task is
    /// discarded to make room for the new one.
    ///
    /// Defaults to `15`.
    pub queue_capacity: usize,

    /// How long a worker beyond `core_threads` waits for work before exiting.
    ///
    /// Defaults to `32s`.
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_threads: 16,
            max_threads: 128,
            queue_capacity: 15,
            keep_alive: Duration::from_secs(32),
        }
    }
}

impl ExecutorConfig {
    /// Checks that a pool of this size can run work at all.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.core_threads == 0 {
            return Err(ExecutorError::InvalidConfig(
                "executor.core_threads must be at least 1".into(),
            ));
        }
        if self.max_threads < self.core_threads {
            return Err(ExecutorError::InvalidConfig(format!(
                "executor.max_threads ({}) must not be smaller than executor.core_threads ({})",
                self.max_threads, self.core_threads
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ExecutorError::InvalidConfig(
                "executor.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the in-memory image cache.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Capacity (in bytes) of the strongly retained tier.
    ///
    /// Defaults to `5 MiB (= 5_242_880)`.
    pub strong_capacity: u64,

    /// Whether entries evicted from the strong tier are demoted to the weak tier.
    ///
    /// When disabled, evicted images are dropped right away.
    ///
    /// Defaults to `true`.
    pub demote_evicted: bool,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            strong_capacity: 5 * 1024 * 1024,
            demote_evicted: true,
        }
    }
}

/// Configuration of the download layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Which directory to persist downloaded originals in. Default is not to persist.
    pub cache_dir: Option<PathBuf>,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for a whole download, including reading the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// The `User-Agent` to send with HTTP requests.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            user_agent: concat!("pixcache/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// The fallback decode target for slots that do not report a size.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 800,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Sizing of the background worker pool.
    pub executor: ExecutorConfig,

    /// Configuration of the in-memory image cache.
    pub cache: InMemoryCacheConfig,

    /// Configuration of fetching and persisting originals.
    pub downloads: DownloadConfig,

    /// The fallback decode target.
    pub display: DisplayConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        // check for empty files explicitly
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.executor.validate()?;
        Ok(())
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
