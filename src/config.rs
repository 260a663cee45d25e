use std::{fs, path::PathBuf};

use jiff::SignedDuration;
use ron::{Options, extensions::Extensions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ingest::DigestPolicy, report::DEFAULT_MAX_REPORT_LENGTH};

/// `STREAMER_INGEST__RETRY__MAX_ATTEMPTS=3` overrides `retry.max_attempts`
pub const ENV_PREFIX: &str = "STREAMER_INGEST";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("layering error: {0}")]
    Layer(#[from] ::config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub retry: RetryConfig,
    pub throttle: StreamerThrottleConfig,
    pub max_report_length: usize,
    pub digest_policy: DigestPolicy,
    pub workers: usize,
    /// `<blob_root>/<bucket>/<key>`
    pub blob_root: PathBuf,
    /// cursors and points
    pub state_root: PathBuf,
    pub log_filter: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            throttle: StreamerThrottleConfig::default(),
            max_report_length: DEFAULT_MAX_REPORT_LENGTH,
            digest_policy: DigestPolicy::default(),
            workers: 4,
            blob_root: PathBuf::from("./reports"),
            state_root: PathBuf::from("./state"),
            log_filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// lifetime of an attempt counter, whatever its value
    pub expiry_secs: u64,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            expiry_secs: 10 * 3600,
            delay_secs: 300,
        }
    }
}

impl RetryConfig {
    pub fn expiry(&self) -> SignedDuration {
        SignedDuration::from_secs(self.expiry_secs as i64)
    }

    pub fn delay(&self) -> SignedDuration {
        SignedDuration::from_secs(self.delay_secs as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamerThrottleConfig {
    pub expiry_secs: u64,
    pub reschedule_secs: u64,
    pub notify_every: u32,
    pub give_up_after: u32,
}

impl Default for StreamerThrottleConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 5 * 3600,
            reschedule_secs: 120,
            notify_every: 50,
            give_up_after: 200,
        }
    }
}

impl StreamerThrottleConfig {
    pub fn expiry(&self) -> SignedDuration {
        SignedDuration::from_secs(self.expiry_secs as i64)
    }

    pub fn reschedule(&self) -> SignedDuration {
        SignedDuration::from_secs(self.reschedule_secs as i64)
    }
}

impl IngestConfig {
    /// File (when given) layered under `STREAMER_INGEST__*` environment variables
    pub fn load(file_path: Option<&str>) -> Result<Self, ConfigError> {
        let base = match file_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.layer_env(None)
    }

    pub fn from_file(file_path: &str) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(file_path)?)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let options = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
            .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES);
        Ok(options.from_str(s)?)
    }

    /// `vars` replaces the process environment when given
    fn layer_env(self, vars: Option<::config::Map<String, String>>) -> Result<Self, ConfigError> {
        let layered = ::config::Config::builder()
            .add_source(::config::Config::try_from(&self)?)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;
        Ok(layered.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::parse("()").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.expiry_secs, 36_000);
        assert_eq!(config.throttle.expiry_secs, 18_000);
        assert_eq!(config.digest_policy, DigestPolicy::WarnAndIngest);
    }

    #[test]
    fn test_parse_partial() {
        let config = IngestConfig::parse(
            r#"(
                retry: (max_attempts: 3),
                digest_policy: Reject,
                workers: 8,
            )"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_secs, 300);
        assert_eq!(config.digest_policy, DigestPolicy::Reject);
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_env_overrides() {
        let mut vars = ::config::Map::new();
        vars.insert("STREAMER_INGEST__RETRY__DELAY_SECS".to_string(), "60".to_string());
        vars.insert("STREAMER_INGEST__LOG_FILTER".to_string(), "debug".to_string());

        let config = IngestConfig::default().layer_env(Some(vars)).unwrap();
        assert_eq!(config.retry.delay_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.log_filter, "debug");
    }
}
