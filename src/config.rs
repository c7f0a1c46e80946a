//! Configuration types for fic2kindle

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behavior for one call site
///
/// Each network call site carries its own policy: archive binary endpoints
/// are throttled harder than page loads, so downloads get wider caps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_ms_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 8 seconds)
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
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy for work page fetches.
    pub fn page_fetch() -> Self {
        Self::default()
    }

    /// Policy for ebook file downloads. Wider delays: the archive throttles
    /// binary endpoints more aggressively than page loads.
    pub fn download() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Policy for mail sends.
    pub fn mail_send() -> Self {
        Self::default()
    }
}

/// Request queue pacing
///
/// The queue slows a session down on purpose: the archive's abuse detection
/// is sensitive to request concurrency and spacing, not just volume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Minimum gap between two dispatches (default: 3 seconds)
    #[serde(default = "default_min_interval", with = "duration_ms_serde")]
    pub min_interval: Duration,

    /// Fixed pause after every operation settles, applied even when the
    /// minimum gap was already satisfied, to smooth bursts (default: 500 ms)
    #[serde(default = "default_inter_item_pause", with = "duration_ms_serde")]
    pub inter_item_pause: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            inter_item_pause: default_inter_item_pause(),
        }
    }
}

/// Archive fetch configuration (hosts, relay, timeouts, retry policies)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Domain of the source archive (default: "archiveofourown.org")
    #[serde(default = "default_archive_host")]
    pub archive_host: String,

    /// Base URL of the CORS relay; targets are appended as `?url=...`
    #[serde(default = "default_proxy_base")]
    pub proxy_base: String,

    /// Time allowance for a page fetch attempt (default: 30 seconds)
    #[serde(default = "default_page_timeout", with = "duration_ms_serde")]
    pub page_timeout: Duration,

    /// Time allowance for a download attempt; longer than page fetches
    /// because ebook files take a while to relay (default: 60 seconds)
    #[serde(default = "default_download_timeout", with = "duration_ms_serde")]
    pub download_timeout: Duration,

    /// Retry policy for page fetches
    #[serde(default = "RetryConfig::page_fetch")]
    pub page_retry: RetryConfig,

    /// Retry policy for file downloads
    #[serde(default = "RetryConfig::download")]
    pub download_retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            archive_host: default_archive_host(),
            proxy_base: default_proxy_base(),
            page_timeout: default_page_timeout(),
            download_timeout: default_download_timeout(),
            page_retry: RetryConfig::page_fetch(),
            download_retry: RetryConfig::download(),
        }
    }
}

/// Main configuration for the send pipeline
///
/// All fields have working defaults; construct with `Config::default()` and
/// override what you need.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Archive fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Request queue pacing
    #[serde(default)]
    pub queue: QueueConfig,

    /// Retry policy for mail sends
    #[serde(default = "RetryConfig::mail_send")]
    pub mail_retry: RetryConfig,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_min_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_inter_item_pause() -> Duration {
    Duration::from_millis(500)
}

fn default_archive_host() -> String {
    "archiveofourown.org".to_string()
}

fn default_proxy_base() -> String {
    "http://127.0.0.1:8787/".to_string()
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60)
}

// Millisecond-resolution Duration serialization helper
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
