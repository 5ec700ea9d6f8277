use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Runtime configuration for the correlation pipeline.
///
/// Values resolve in three layers: compiled defaults, then an optional YAML
/// file, then the environment variables named in the field docs. Durations
/// accept humantime strings (`60s`, `200ms`) in both the file and the
/// environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upstream and sink host (`HOST`). Default: "localhost".
    #[serde(default = "default_host")]
    pub host: String,

    /// Upstream and sink port (`PORT`). Default: 7299.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Pending entry age at which it becomes orphaned (`ORPHAN_TIMEOUT`).
    /// Default: 60s.
    #[serde(default = "default_orphan_timeout", with = "humantime_serde")]
    pub orphan_timeout: Duration,

    /// Cadence of the orphan flusher (`FLUSH_INTERVAL`). Default: 2s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Delay between upstream polls (`POLL_INTERVAL`). Default: 1ms.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Initial sink retry backoff, doubling per attempt (`POST_RETRY_DELAY`).
    /// Default: 200ms.
    #[serde(default = "default_post_retry_delay", with = "humantime_serde")]
    pub post_retry_delay: Duration,

    /// Total sink attempts per classification (`MAX_RETRIES`). Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Soft cap on the pending table; the oldest excess entries are evicted
    /// as orphans (`MAX_PENDING_SIZE`). Default: 10000.
    #[serde(default = "default_max_pending_size")]
    pub max_pending_size: usize,

    /// Max concurrent in-flight sink submissions (`SINK_CONCURRENCY`).
    /// Default: 64.
    #[serde(default = "default_sink_concurrency")]
    pub sink_concurrency: usize,

    /// Terminal-drain wall-clock cap (`SHUTDOWN_DEADLINE`). Default: 10s.
    #[serde(default = "default_shutdown_deadline", with = "humantime_serde")]
    pub shutdown_deadline: Duration,

    /// Per-request HTTP timeout (`REQUEST_TIMEOUT`). Default: 10s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

// --- Default value functions ---

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7299
}

fn default_orphan_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1)
}

fn default_post_retry_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_pending_size() -> usize {
    10_000
}

fn default_sink_concurrency() -> usize {
    64
}

fn default_shutdown_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            orphan_timeout: default_orphan_timeout(),
            flush_interval: default_flush_interval(),
            poll_interval: default_poll_interval(),
            post_retry_delay: default_post_retry_delay(),
            max_retries: default_max_retries(),
            max_pending_size: default_max_pending_size(),
            sink_concurrency: default_sink_concurrency(),
            shutdown_deadline: default_shutdown_deadline(),
            request_timeout: default_request_timeout(),
        }
    }
}

// --- Loading, environment overrides, validation ---

impl Config {
    /// Resolve the configuration: defaults, then the optional YAML file,
    /// then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&data)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };

        cfg.apply_env()?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Overlay the environment variables from the configuration surface.
    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("HOST")? {
            self.host = v;
        }
        if let Some(v) = env_var("PORT")? {
            self.port = v.parse().with_context(|| format!("parsing PORT {v:?}"))?;
        }
        if let Some(v) = env_var("ORPHAN_TIMEOUT")? {
            self.orphan_timeout = parse_duration("ORPHAN_TIMEOUT", &v)?;
        }
        if let Some(v) = env_var("FLUSH_INTERVAL")? {
            self.flush_interval = parse_duration("FLUSH_INTERVAL", &v)?;
        }
        if let Some(v) = env_var("POLL_INTERVAL")? {
            self.poll_interval = parse_duration("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = env_var("POST_RETRY_DELAY")? {
            self.post_retry_delay = parse_duration("POST_RETRY_DELAY", &v)?;
        }
        if let Some(v) = env_var("MAX_RETRIES")? {
            self.max_retries = v
                .parse()
                .with_context(|| format!("parsing MAX_RETRIES {v:?}"))?;
        }
        if let Some(v) = env_var("MAX_PENDING_SIZE")? {
            self.max_pending_size = v
                .parse()
                .with_context(|| format!("parsing MAX_PENDING_SIZE {v:?}"))?;
        }
        if let Some(v) = env_var("SINK_CONCURRENCY")? {
            self.sink_concurrency = v
                .parse()
                .with_context(|| format!("parsing SINK_CONCURRENCY {v:?}"))?;
        }
        if let Some(v) = env_var("SHUTDOWN_DEADLINE")? {
            self.shutdown_deadline = parse_duration("SHUTDOWN_DEADLINE", &v)?;
        }
        if let Some(v) = env_var("REQUEST_TIMEOUT")? {
            self.request_timeout = parse_duration("REQUEST_TIMEOUT", &v)?;
        }
        Ok(())
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            bail!("host must not be empty");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be positive");
        }
        if self.sink_concurrency == 0 {
            bail!("sink_concurrency must be positive");
        }
        if self.max_pending_size == 0 {
            bail!("max_pending_size must be positive");
        }
        if self.flush_interval.is_zero() {
            bail!("flush_interval must be positive");
        }
        Ok(())
    }

    /// Base URL shared by the upstream and sink endpoints.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn env_var(key: &str) -> Result<Option<String>> {
    match std::env::var(key) {
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {key}")),
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).with_context(|| format!("parsing {key} value {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 7299);
        assert_eq!(cfg.orphan_timeout, Duration::from_secs(60));
        assert_eq!(cfg.flush_interval, Duration::from_secs(2));
        assert_eq!(cfg.post_retry_delay, Duration::from_millis(200));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_pending_size, 10_000);
        assert_eq!(cfg.sink_concurrency, 64);
        assert_eq!(cfg.shutdown_deadline, Duration::from_secs(10));
    }

    #[test]
    fn test_base_url() {
        let cfg = Config {
            host: "example.test".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(cfg.base_url(), "http://example.test:8080");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let cfg: Config = serde_yaml::from_str(
            r#"
host: upstream.test
orphan_timeout: 5s
max_retries: 5
"#,
        )
        .expect("parse yaml");

        assert_eq!(cfg.host, "upstream.test");
        assert_eq!(cfg.port, 7299);
        assert_eq!(cfg.orphan_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_retries, 5);
    }

    #[test]
    fn test_validation_rejects_zero_retries() {
        let cfg = Config {
            max_retries: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_validation_rejects_empty_host() {
        let cfg = Config {
            host: String::new(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let cfg = Config {
            sink_concurrency: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sink_concurrency"));
    }

    #[test]
    fn test_parse_duration_rejects_invalid_values() {
        assert!(parse_duration("ORPHAN_TIMEOUT", "60s").is_ok());
        assert!(parse_duration("ORPHAN_TIMEOUT", "banana").is_err());
    }
}
