//! Configuration types for skygen

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Remote service connection configuration
///
/// Groups settings for reaching the generation service. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the generation service API (default: "http://127.0.0.1:8080")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent in the `x-api-key` header; opaque to this library
    #[serde(default)]
    pub api_key: String,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Push-channel WebSocket URL (None = polling only)
    #[serde(default)]
    pub push_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            push_url: None,
        }
    }
}

/// Artifact cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, one file per artifact (default: "./artifact-cache")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

/// Job status tracking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Interval between status polls (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,

    /// Safety-net poll interval multiplier when push delivery is active
    /// (default: 10, i.e. one poll every 10 × `poll_interval`)
    #[serde(default = "default_safety_poll_multiplier")]
    pub safety_poll_multiplier: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            safety_poll_multiplier: default_safety_poll_multiplier(),
        }
    }
}

impl TrackingConfig {
    /// The slow background poll interval used as a push-delivery safety net
    pub fn safety_poll_interval(&self) -> Duration {
        self.poll_interval * self.safety_poll_multiplier.max(1)
    }
}

/// Retry configuration for transient submission failures
///
/// Applied by the orchestrators to job/export creation only; status polls
/// and artifact downloads are never retried.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Top-level configuration for [`SkygenClient`](crate::SkygenClient)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote service connection settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Artifact cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Status tracking settings
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Submission retry settings
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// Checks that the base URL parses, the poll interval is non-zero, and
    /// the push URL (when set) has a WebSocket scheme.
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = url::Url::parse(&self.api.base_url) {
            return Err(Error::Config {
                message: format!("invalid base URL '{}': {}", self.api.base_url, e),
                key: Some("api.base_url".to_string()),
            });
        }
        if self.tracking.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be non-zero".to_string(),
                key: Some("tracking.poll_interval".to_string()),
            });
        }
        if let Some(push_url) = &self.api.push_url {
            match url::Url::parse(push_url) {
                Ok(u) if u.scheme() == "ws" || u.scheme() == "wss" => {}
                Ok(u) => {
                    return Err(Error::Config {
                        message: format!("push URL must be ws:// or wss://, got '{}'", u.scheme()),
                        key: Some("api.push_url".to_string()),
                    });
                }
                Err(e) => {
                    return Err(Error::Config {
                        message: format!("invalid push URL '{}': {}", push_url, e),
                        key: Some("api.push_url".to_string()),
                    });
                }
            }
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_user_agent() -> String {
    concat!("skygen/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./artifact-cache")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_safety_poll_multiplier() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration (milliseconds) serialization helper
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Duration (seconds) serialization helper
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
