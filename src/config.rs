//! Provider configuration.
//!
//! Connection settings come from the provider configuration block, falling back
//! to environment variables:
//!
//! | attribute    | environment variable      |
//! |--------------|---------------------------|
//! | `api_url`    | `GROUNDCOVER_API_URL`     |
//! | `api_key`    | `GROUNDCOVER_API_KEY`     |
//! | `backend_id` | `GROUNDCOVER_BACKEND_ID`  |
//!
//! All three are required. The resolved [`ClientConfig`] is immutable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProviderError, Result};
use crate::schema::{Attribute, Schema};
use crate::transport::RetryPolicy;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "GROUNDCOVER_API_URL";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "GROUNDCOVER_API_KEY";
/// Environment variable holding the backend identifier.
pub const ENV_BACKEND_ID: &str = "GROUNDCOVER_BACKEND_ID";

/// Default timeout for a single HTTP round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 20;
/// Largest accepted retry wait or request timeout, in seconds.
pub const MAX_WAIT_SECS: u64 = 3600;

/// The provider configuration block as declared by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the groundcover API.
    #[serde(default)]
    pub api_url: Option<String>,
    /// API key used for authentication.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Backend (tenant) identifier.
    #[serde(default)]
    pub backend_id: Option<String>,
    /// Maximum number of retries for rate-limited or unavailable responses.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Lower bound of the retry backoff, in seconds.
    #[serde(default)]
    pub retry_wait_min_secs: Option<u64>,
    /// Upper bound of the retry backoff, in seconds.
    #[serde(default)]
    pub retry_wait_max_secs: Option<u64>,
    /// Timeout for a single HTTP round trip, in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    /// Parse the configuration block. `null` means an empty block.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider config: {}", e)))
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "api_url",
                Attribute::optional_string()
                    .with_description(format!("Base URL of the API. Defaults to ${ENV_API_URL}.")),
            )
            .with_attribute(
                "api_key",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!("API key. Defaults to ${ENV_API_KEY}.")),
            )
            .with_attribute(
                "backend_id",
                Attribute::optional_string()
                    .with_description(format!("Backend identifier. Defaults to ${ENV_BACKEND_ID}.")),
            )
            .with_attribute("max_retries", Attribute::optional_int64())
            .with_attribute("retry_wait_min_secs", Attribute::optional_int64())
            .with_attribute("retry_wait_max_secs", Attribute::optional_int64())
            .with_attribute("request_timeout_secs", Attribute::optional_int64())
    }
}

/// Fully resolved client settings.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL, without a trailing slash.
    pub api_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Backend identifier sent in `X-Backend-Id`.
    pub backend_id: String,
    /// Retry behaviour for rate-limited calls.
    pub retry: RetryPolicy,
    /// Timeout for a single HTTP round trip.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("backend_id", &self.backend_id)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Resolve settings from the config block and the process environment.
    pub fn resolve(config: &ProviderConfig) -> Result<Self> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Resolve settings using `env` to look up environment variables.
    pub fn resolve_with<F>(config: &ProviderConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = required(config.api_url.as_deref(), "api_url", ENV_API_URL, &env)?;
        let api_key = required(config.api_key.as_deref(), "api_key", ENV_API_KEY, &env)?;
        let backend_id = required(
            config.backend_id.as_deref(),
            "backend_id",
            ENV_BACKEND_ID,
            &env,
        )?;

        let parsed = Url::parse(&api_url).map_err(|e| {
            ProviderError::Configuration(format!("invalid api_url '{}': {}", api_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Configuration(format!(
                "api_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = config.max_retries {
            if max_retries > MAX_RETRIES_LIMIT {
                return Err(ProviderError::Configuration(format!(
                    "max_retries must be at most {}, got {}",
                    MAX_RETRIES_LIMIT, max_retries
                )));
            }
            retry.max_retries = max_retries;
        }
        if let Some(secs) = config.retry_wait_min_secs {
            retry.min_wait = bounded_secs("retry_wait_min_secs", secs, 0)?;
        }
        if let Some(secs) = config.retry_wait_max_secs {
            retry.max_wait = bounded_secs("retry_wait_max_secs", secs, 0)?;
        }
        if retry.min_wait > retry.max_wait {
            return Err(ProviderError::Configuration(format!(
                "retry_wait_min_secs ({}s) must not exceed retry_wait_max_secs ({}s)",
                retry.min_wait.as_secs(),
                retry.max_wait.as_secs()
            )));
        }

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            backend_id,
            retry,
            request_timeout: match config.request_timeout_secs {
                Some(secs) => bounded_secs("request_timeout_secs", secs, 1)?,
                None => DEFAULT_REQUEST_TIMEOUT,
            },
        })
    }

    /// Deadline budget for one logical call, covering every retry.
    pub fn call_timeout(&self) -> Duration {
        let attempts = self.retry.max_retries.saturating_add(1);
        self.retry
            .max_total_wait()
            .saturating_add(self.request_timeout.saturating_mul(attempts))
    }
}

fn bounded_secs(attribute: &str, secs: u64, min: u64) -> Result<Duration> {
    if secs < min || secs > MAX_WAIT_SECS {
        return Err(ProviderError::Configuration(format!(
            "{} must be between {} and {} seconds, got {}",
            attribute, min, MAX_WAIT_SECS, secs
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn required<F>(configured: Option<&str>, attribute: &str, variable: &str, env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    configured
        .map(str::to_string)
        .or_else(|| env(variable))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ProviderError::Configuration(format!(
                "'{}' is not set; configure it in the provider block or export {}",
                attribute, variable
            ))
        })
}
