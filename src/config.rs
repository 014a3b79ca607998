//! Configuration types
//!
//! Configuration is read from a TOML file whose `[api_vc]` section holds the
//! credentials used for the token exchange. Every other section is optional
//! and falls back to the defaults documented on each field.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default token exchange endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";

/// Default reports API host (North America)
pub const DEFAULT_API_BASE_URL: &str = "https://sellingpartnerapi-na.amazon.com";

/// Main configuration for the report pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// API credentials (`[api_vc]` section)
    #[serde(rename = "api_vc")]
    pub credentials: Credentials,

    /// Endpoint locations and HTTP settings
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Backoff budget shared by every retried stage
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch execution settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Create a configuration with the given credentials and default settings
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoints: EndpointConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config {
            message: format!("failed to parse config: {}", e.message()),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable before any network call is made
    pub fn validate(&self) -> Result<()> {
        self.credentials.validate()?;

        for (key, value) in [
            ("endpoints.token_url", &self.endpoints.token_url),
            ("endpoints.api_base_url", &self.endpoints.api_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::config(format!("invalid URL '{}': {}", value, e), key))?;
        }

        if self.endpoints.request_timeout.is_zero() {
            return Err(Error::config(
                "request timeout must be greater than zero",
                "endpoints.request_timeout",
            ));
        }
        if self.retry.base_wait.is_zero() {
            return Err(Error::config(
                "base wait must be greater than zero",
                "retry.base_wait",
            ));
        }
        if self.pipeline.max_workers == 0 {
            return Err(Error::config(
                "max_workers must be at least 1",
                "pipeline.max_workers",
            ));
        }
        Ok(())
    }
}

/// Long-lived credentials exchanged for an access token
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// LWA client identifier
    #[serde(default)]
    pub client_id: String,

    /// LWA client secret
    #[serde(default)]
    pub client_secret: String,

    /// Refresh token issued for the selling partner
    #[serde(default)]
    pub refresh_token: String,
}

impl Credentials {
    /// Create credentials from their three parts
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("api_vc.client_id", &self.client_id),
            ("api_vc.client_secret", &self.client_secret),
            ("api_vc.refresh_token", &self.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{} is missing or empty", key), key));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Endpoint locations and HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Token exchange URL
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Base URL of the reports API (scheme and host, no trailing path)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout applied by the HTTP client (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Backoff budget configuration
///
/// The wait before retry `n` (zero-based) is `base_wait * 2^n`, capped by
/// whatever remains of `max_wait`. The budget is measured in time spent
/// waiting, not in attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Wait before the first retry (default: 2 seconds)
    #[serde(default = "default_base_wait", with = "duration_serde")]
    pub base_wait: Duration,

    /// Total wait budget per retried stage (default: 300 seconds)
    #[serde(default = "default_max_wait", with = "duration_serde")]
    pub max_wait: Duration,

    /// Add random jitter to each wait, still capped by the remaining budget (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_wait: default_base_wait(),
            max_wait: default_max_wait(),
            jitter: false,
        }
    }
}

/// Batch execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of report jobs in flight at once (default: 3)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Fail authentication immediately when a successful token response has
    /// no `access_token`, instead of retrying until the budget runs out
    #[serde(default)]
    pub malformed_token_is_fatal: bool,

    /// Fail a job as soon as the API reports `CANCELLED` or `FATAL`,
    /// instead of polling until the budget runs out
    #[serde(default)]
    pub fail_fast_on_terminal_status: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            malformed_token_is_fatal: false,
            fail_fast_on_terminal_status: false,
        }
    }
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_base_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(300)
}

fn default_max_workers() -> usize {
    3
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
