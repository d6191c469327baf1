//! Configuration management for clipcast
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::VideoType;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Publish policy
    pub schedule: ScheduleConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Degraded-mode configuration
    pub degraded: DegradedConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Per content type daily publish caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyLimits {
    #[serde(rename = "final")]
    pub final_videos: u32,

    #[serde(rename = "short")]
    pub short_videos: u32,
}

impl DailyLimits {
    /// Cap for a content type
    pub fn for_type(&self, video_type: VideoType) -> u32 {
        match video_type {
            VideoType::Final => self.final_videos,
            VideoType::Short => self.short_videos,
        }
    }
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            final_videos: 2,
            short_videos: 5,
        }
    }
}

/// Publish policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily caps per content type
    pub daily_limits: DailyLimits,

    /// Ordered "HH:MM" preferences; order is priority, not chronology
    pub preferred_times: Vec<String>,

    /// Weighted API budget per day
    pub quota_limit: u32,

    /// Fraction of the budget at which warnings start
    pub warning_threshold: f64,

    /// Look-ahead window in days
    pub window_days: u32,

    /// Weighted cost charged per publish action
    pub upload_cost: u32,

    /// Publishing timezone as a fixed UTC offset in minutes
    pub utc_offset_minutes: i32,

    /// Give back the reservation when a scheduled upload is cancelled
    pub release_quota_on_cancel: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_limits: DailyLimits::default(),
            preferred_times: vec!["10:00".into(), "14:00".into(), "18:00".into()],
            quota_limit: 10_000,
            warning_threshold: 0.8,
            window_days: 7,
            upload_cost: 1_600,
            utc_offset_minutes: 0,
            release_quota_on_cancel: false,
        }
    }
}

impl ScheduleConfig {
    /// Publishing timezone
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::config(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }

    /// Validate numeric bounds; preferred times are checked lazily by the allocator
    pub fn validate(&self) -> Result<()> {
        if self.daily_limits.final_videos == 0 || self.daily_limits.short_videos == 0 {
            return Err(Error::config("daily_limits must be positive"));
        }

        if self.quota_limit == 0 {
            return Err(Error::config("quota_limit must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.warning_threshold) {
            return Err(Error::config("warning_threshold must be within [0, 1]"));
        }

        if self.window_days == 0 {
            return Err(Error::config("window_days must be greater than 0"));
        }

        if self.upload_cost == 0 {
            return Err(Error::config("upload_cost must be greater than 0"));
        }

        self.offset()?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// Bounded wait for the schedule write lock
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Lock wait as Duration
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/schedule.db"),
            lock_timeout_ms: 5_000,
        }
    }
}

/// Degraded-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradedConfig {
    /// Occupancy cache file
    pub cache_path: PathBuf,

    /// Maximum publishes per day across all buckets
    pub daily_max_total: u32,

    /// Maximum publishes per bucket
    pub slot_capacity: u32,

    /// Bucket start times ("HH:MM"), in priority order
    pub bucket_times: Vec<String>,

    /// Look-ahead window in days
    pub window_days: u32,

    /// Days ahead of the last-resort slot
    pub fallback_days: u32,

    /// Listing endpoint of the video platform
    pub platform_url: String,

    /// Bearer token for the listing endpoint
    pub platform_token: Option<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for DegradedConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("data/degraded_schedule.json"),
            daily_max_total: 4,
            slot_capacity: 1,
            bucket_times: vec![
                "00:00".into(),
                "06:00".into(),
                "12:00".into(),
                "18:00".into(),
            ],
            window_days: 7,
            fallback_days: 7,
            platform_url: String::from("http://localhost:8080/v1/videos/scheduled"),
            platform_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl DegradedConfig {
    /// Request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.daily_max_total == 0 || self.slot_capacity == 0 {
            return Err(Error::config(
                "daily_max_total and slot_capacity must be greater than 0",
            ));
        }

        if self.window_days == 0 {
            return Err(Error::config("degraded window_days must be greater than 0"));
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let schedule = &mut config.schedule;

        if let Some(v) = env_parse("CLIPCAST_FINAL_DAILY_LIMIT") {
            schedule.daily_limits.final_videos = v;
        }
        if let Some(v) = env_parse("CLIPCAST_SHORT_DAILY_LIMIT") {
            schedule.daily_limits.short_videos = v;
        }
        if let Ok(times) = std::env::var("CLIPCAST_PREFERRED_TIMES") {
            schedule.preferred_times = times
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(v) = env_parse("CLIPCAST_QUOTA_LIMIT") {
            schedule.quota_limit = v;
        }
        if let Some(v) = env_parse("CLIPCAST_WARNING_THRESHOLD") {
            schedule.warning_threshold = v;
        }
        if let Some(v) = env_parse("CLIPCAST_WINDOW_DAYS") {
            schedule.window_days = v;
        }
        if let Some(v) = env_parse("CLIPCAST_UPLOAD_COST") {
            schedule.upload_cost = v;
        }
        if let Some(v) = env_parse("CLIPCAST_UTC_OFFSET_MINUTES") {
            schedule.utc_offset_minutes = v;
        }
        if let Some(v) = env_parse("CLIPCAST_RELEASE_QUOTA_ON_CANCEL") {
            schedule.release_quota_on_cancel = v;
        }

        if let Ok(path) = std::env::var("CLIPCAST_SQLITE_PATH") {
            config.database.sqlite_path = path.into();
        }
        if let Some(v) = env_parse("CLIPCAST_LOCK_TIMEOUT_MS") {
            config.database.lock_timeout_ms = v;
        }

        if let Ok(path) = std::env::var("CLIPCAST_DEGRADED_CACHE") {
            config.degraded.cache_path = path.into();
        }
        if let Ok(url) = std::env::var("CLIPCAST_PLATFORM_URL") {
            config.degraded.platform_url = url;
        }
        config.degraded.platform_token = std::env::var("CLIPCAST_PLATFORM_TOKEN").ok();

        if let Ok(level) = std::env::var("CLIPCAST_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("CLIPCAST_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(
                format!("Failed to read config file: {}", path.display()),
                e,
            )
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::with_source(
                format!("Failed to parse TOML config file: {}", path.display()),
                e,
            )
        })?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;
        self.degraded.validate()?;

        if self.database.lock_timeout_ms == 0 {
            return Err(Error::config("lock_timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_warning_threshold() {
        let mut config = AppConfig::default();
        config.schedule.warning_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = AppConfig::default();
        config.schedule.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offset_out_of_range() {
        let config = ScheduleConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(config.offset().is_err());
    }

    #[test]
    fn test_lock_timeout_conversion() {
        let config = DatabaseConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_daily_limits_toml_keys() {
        let config: ScheduleConfig = toml::from_str(
            r#"
            preferred_times = ["09:30", "13:00"]
            upload_cost = 1600

            [daily_limits]
            final = 3
            short = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.daily_limits.for_type(VideoType::Final), 3);
        assert_eq!(config.daily_limits.for_type(VideoType::Short), 6);
        assert_eq!(config.preferred_times, vec!["09:30", "13:00"]);
        assert_eq!(config.quota_limit, 10_000);
    }
}
