use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

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
    /// The log level for gatekeep.
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
            prefix: "gatekeep".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Tuning of the cache-miss protocol.
///
/// The protocol works best when `value_ttl` is well above `lock_ttl`, and `wait_timeout` is at
/// least `lock_ttl`. See [`CoalescingConfig::check`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CoalescingConfig {
    /// How long the advisory lock of a producing caller survives.
    ///
    /// If the producer crashes or hangs, other callers can take over after this time.
    #[serde(with = "humantime_serde")]
    pub lock_ttl: Duration,

    /// How long a produced value is served from the cache.
    #[serde(with = "humantime_serde")]
    pub value_ttl: Duration,

    /// How long a waiting caller waits for the producer's broadcast before starting over.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Interval of the background task evicting expired cache entries.
    ///
    /// Shorter intervals free abandoned locks sooner at the cost of more CPU.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Upper bound for handing a broadcast to a single subscriber.
    #[serde(with = "humantime_serde")]
    pub delivery_timeout: Duration,

    /// How often a waiting caller may start the protocol over.
    ///
    /// A value of `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            value_ttl: Duration::from_secs(15),
            wait_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(100),
            delivery_timeout: Duration::from_secs(1),
            max_retries: Some(5),
        }
    }
}

impl CoalescingConfig {
    /// Returns a description of every violated tuning relationship.
    pub fn check(&self) -> Vec<&'static str> {
        let mut problems = vec![];
        if self.value_ttl <= self.lock_ttl {
            problems.push("`value_ttl` should exceed `lock_ttl`");
        }
        if self.wait_timeout < self.lock_ttl {
            problems.push("`wait_timeout` should be at least `lock_ttl`");
        }
        if self.sweep_interval.is_zero() {
            problems.push("`sweep_interval` must not be zero, using the default");
        }
        problems
    }

    /// The sweep interval to use, falling back to the default for a zero interval.
    pub fn effective_sweep_interval(&self) -> Duration {
        if self.sweep_interval.is_zero() {
            Self::default().sweep_interval
        } else {
            self.sweep_interval
        }
    }
}

/// Configures the bundled [`SlowQueryProducer`](crate::services::SlowQueryProducer).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ProducerConfig {
    /// How long producing a single value takes.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// The produced value.
    pub value: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            value: "value_from_slow_query".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Tuning of the cache-miss protocol.
    pub coalescing: CoalescingConfig,

    /// Configuration of the value producer.
    pub producer: ProducerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:8080".to_owned(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            coalescing: CoalescingConfig::default(),
            producer: ProducerConfig::default(),
        }
    }
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
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
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
