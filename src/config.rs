//! Configuration loading for the ServiceNow gateway
//!
//! Settings come from an optional TOML file followed by environment variables
//! prefixed with `SERVICENOW_` (nested keys use `__`, e.g.
//! `SERVICENOW_RETRY__MAX_RETRIES`). Later sources win.

use crate::error::{Result, ServiceNowError};
use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable prefix
const ENV_PREFIX: &str = "SERVICENOW";

/// Default upstream request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry settings for upstream calls
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait before the first retry; doubles for each subsequent retry
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Whether POST requests are retried on transient failure.
    ///
    /// A POST whose response was lost may already have created the record,
    /// so disabling this trades availability for no duplicate creates.
    #[serde(default = "default_true")]
    pub retry_unsafe_methods: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            retry_unsafe_methods: true,
        }
    }
}

/// Circuit breaker settings for upstream calls
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failed calls before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Settings as they appear in the file/environment
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    instance_url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    retry: RetrySettings,
    #[serde(default)]
    breaker: BreakerSettings,
}

/// Validated gateway configuration
#[derive(Debug)]
pub struct ServiceNowConfig {
    /// Instance base URL, e.g. `https://dev12345.service-now.com` (no trailing slash)
    pub instance_url: String,

    /// Basic auth user
    pub username: String,

    /// Basic auth password
    pub password: SecretString,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retry policy settings
    pub retry: RetrySettings,

    /// Circuit breaker settings
    pub breaker: BreakerSettings,
}

impl ServiceNowConfig {
    /// Build a config directly (tests, embedding)
    pub fn new(
        instance_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::from_raw(RawConfig {
            instance_url: instance_url.into(),
            username: username.into(),
            password: password.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
        })
    }

    /// Load from an optional file plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load from an optional file plus an explicit environment map.
    ///
    /// `None` reads the process environment.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration file: {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let instance_url = raw.instance_url.trim().trim_end_matches('/').to_string();

        if instance_url.is_empty() {
            return Err(config_error(
                "instance_url is required (set SERVICENOW_INSTANCE_URL)",
            ));
        }

        if !instance_url.starts_with("https://") && !instance_url.starts_with("http://") {
            return Err(config_error(format!(
                "instance_url must be an http(s) URL, got '{}'",
                instance_url
            )));
        }

        if instance_url.starts_with("http://") {
            warn!("instance_url uses plain http; credentials will be sent unencrypted");
        }

        if raw.username.is_empty() {
            return Err(config_error(
                "username is required (set SERVICENOW_USERNAME)",
            ));
        }

        if raw.password.is_empty() {
            warn!("No ServiceNow password configured; upstream calls will likely be rejected");
        }

        if raw.breaker.failure_threshold == 0 {
            return Err(config_error("breaker.failure_threshold must be at least 1"));
        }

        Ok(Self {
            instance_url,
            username: raw.username,
            password: SecretString::new(raw.password.into()),
            timeout: Duration::from_secs(raw.timeout_secs),
            retry: raw.retry,
            breaker: raw.breaker,
        })
    }
}

fn config_error(message: impl Into<String>) -> ServiceNowError {
    ServiceNowError::Config(config::ConfigError::Message(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_env_only() {
        let config = ServiceNowConfig::load_with_env(
            None,
            env(&[
                ("SERVICENOW_INSTANCE_URL", "https://dev1.service-now.com/"),
                ("SERVICENOW_USERNAME", "admin"),
                ("SERVICENOW_PASSWORD", "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.instance_url, "https://dev1.service-now.com");
        assert_eq!(config.username, "admin");
        assert_eq!(config.password.expose_secret(), "secret");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown_secs, 30);
    }

    #[test]
    fn test_nested_env_overrides() {
        let config = ServiceNowConfig::load_with_env(
            None,
            env(&[
                ("SERVICENOW_INSTANCE_URL", "https://dev1.service-now.com"),
                ("SERVICENOW_USERNAME", "admin"),
                ("SERVICENOW_RETRY__MAX_RETRIES", "1"),
                ("SERVICENOW_RETRY__RETRY_UNSAFE_METHODS", "false"),
                ("SERVICENOW_BREAKER__COOLDOWN_SECS", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 1);
        assert!(!config.retry.retry_unsafe_methods);
        assert_eq!(config.retry.base_delay_secs, 2);
        assert_eq!(config.breaker.cooldown_secs, 5);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
instance_url = "https://file.service-now.com"
username = "file-user"
password = "file-pass"
timeout_secs = 10

[breaker]
failure_threshold = 2
"#
        )
        .unwrap();

        let config = ServiceNowConfig::load_with_env(
            Some(file.path()),
            env(&[("SERVICENOW_USERNAME", "env-user")]),
        )
        .unwrap();

        assert_eq!(config.instance_url, "https://file.service-now.com");
        assert_eq!(config.username, "env-user");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.breaker.failure_threshold, 2);
    }

    #[test]
    fn test_missing_instance_url() {
        let result = ServiceNowConfig::load_with_env(None, env(&[("SERVICENOW_USERNAME", "a")]));
        match result {
            Err(ServiceNowError::Config(e)) => assert!(e.to_string().contains("instance_url")),
            other => panic!("Expected config error, got: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = ServiceNowConfig::new("ftp://instance", "admin", "pw");
        assert!(matches!(result, Err(ServiceNowError::Config(_))));
    }

    #[test]
    fn test_password_not_in_debug() {
        let config = ServiceNowConfig::new("https://dev1.service-now.com", "admin", "hunter2").unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
