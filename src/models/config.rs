//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::KeyPolicy;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Change-detection and notification behavior
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Snapshot store location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Console/log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitored listing pages
    #[serde(default)]
    pub areas: Vec<AreaConfig>,

    /// Notification channels
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.watcher.retention_days == 0 {
            return Err(AppError::validation("watcher.retention_days must be > 0"));
        }
        if self.watcher.max_notify_attempts == 0 {
            return Err(AppError::validation(
                "watcher.max_notify_attempts must be > 0",
            ));
        }
        if self.areas.is_empty() {
            return Err(AppError::validation("No areas defined"));
        }
        for area in &self.areas {
            if area.url.trim().is_empty() {
                return Err(AppError::validation("Area with empty url"));
            }
            if area.selectors.row.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "Area {} has an empty row selector",
                    area.url
                )));
            }
        }
        let mut names: Vec<&str> = self.channels.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.channels.len() {
            return Err(AppError::validation("Duplicate channel names"));
        }
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(AppError::validation("Channel with empty name"));
            }
            if channel.url.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "Channel {} has an empty url",
                    channel.name
                )));
            }
        }
        Ok(())
    }

    /// Names of all configured channels, in declaration order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

/// Change-detection, retention, and notification retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Suggested minutes between scheduled runs (informational; scheduling
    /// is external)
    #[serde(default = "defaults::check_interval_mins")]
    pub check_interval_mins: u64,

    /// Days to retain events before the sweep deletes them
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,

    /// Delivery attempts per channel before a delivery is marked failed
    #[serde(default = "defaults::max_notify_attempts")]
    pub max_notify_attempts: u32,

    /// Base delay for exponential notification backoff, in seconds
    #[serde(default = "defaults::backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on a single backoff delay, in seconds
    #[serde(default = "defaults::backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Stable-key tie-break rule for item identity
    #[serde(default)]
    pub key_policy: KeyPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            check_interval_mins: defaults::check_interval_mins(),
            retention_days: defaults::retention_days(),
            max_notify_attempts: defaults::max_notify_attempts(),
            backoff_base_secs: defaults::backoff_base_secs(),
            backoff_cap_secs: defaults::backoff_cap_secs(),
            key_policy: KeyPolicy::default(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Snapshot store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "defaults::db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: defaults::db_path(),
        }
    }
}

/// Console/log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Show per-area progress lines during a run
    #[serde(default = "defaults::show_progress")]
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            show_progress: defaults::show_progress(),
        }
    }
}

/// One monitored listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    /// URL of the listing page
    pub url: String,

    /// CSS selectors for item extraction
    pub selectors: AreaSelectors,

    /// Regex patterns stripped from the page before fingerprinting
    /// (session tokens, rendered timestamps, and similar noise)
    #[serde(default)]
    pub volatile_patterns: Vec<String>,
}

/// CSS selectors locating items on a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaSelectors {
    /// Selector that must match for the page structure to be considered
    /// intact; its absence is an extraction failure, not an empty list
    pub container: String,

    /// Selector for one item row within the container
    pub row: String,

    /// Selector for the item name within a row
    pub name: String,

    /// Selector for the item link within a row (defaults to the name
    /// element)
    #[serde(default)]
    pub link: Option<String>,

    /// Attribute carrying the link target
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,
}

/// One notification channel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Unique channel name, used as the delivery tracking key
    pub name: String,

    /// Webhook endpoint URL
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::channel_timeout")]
    pub timeout_secs: u64,
}

mod defaults {
    // Watcher defaults
    pub fn check_interval_mins() -> u64 {
        30
    }
    pub fn retention_days() -> u32 {
        90
    }
    pub fn max_notify_attempts() -> u32 {
        3
    }
    pub fn backoff_base_secs() -> u64 {
        60
    }
    pub fn backoff_cap_secs() -> u64 {
        3600
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; listwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Storage defaults
    pub fn db_path() -> String {
        "data/listwatch.db".into()
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn show_progress() -> bool {
        true
    }

    // Selector defaults
    pub fn link_attr() -> String {
        "href".into()
    }

    // Channel defaults
    pub fn channel_timeout() -> u64 {
        10
    }
}
