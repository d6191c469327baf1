//! Tests for config loading

use clipcast::config::AppConfig;
use serial_test::serial;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const ENV_KEYS: &[&str] = &[
    "CLIPCAST_FINAL_DAILY_LIMIT",
    "CLIPCAST_PREFERRED_TIMES",
    "CLIPCAST_UPLOAD_COST",
    "CLIPCAST_UTC_OFFSET_MINUTES",
    "CLIPCAST_SQLITE_PATH",
    "CLIPCAST_PLATFORM_TOKEN",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_sample_config_is_valid() {
    let config = AppConfig::from_file(Path::new("config.toml")).expect("config.toml should parse");
    config.validate().unwrap();

    assert_eq!(config.schedule.utc_offset_minutes, 540);
    assert_eq!(config.schedule.daily_limits.final_videos, 2);
    assert_eq!(config.schedule.daily_limits.short_videos, 5);
    assert_eq!(config.degraded.bucket_times.len(), 4);
}

#[test]
fn test_partial_file_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[schedule]
quota_limit = 5000

[schedule.daily_limits]
short = 3
"#
    )
    .unwrap();

    let config = AppConfig::from_file(file.path()).unwrap();
    assert_eq!(config.schedule.quota_limit, 5000);
    assert_eq!(config.schedule.daily_limits.short_videos, 3);
    assert_eq!(config.schedule.daily_limits.final_videos, 2);
    assert_eq!(config.schedule.upload_cost, 1600);
    assert_eq!(config.database.lock_timeout_ms, 5000);
}

#[test]
fn test_invalid_file_reports_path() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[schedule\nquota_limit = ").unwrap();

    let err = AppConfig::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML config file"));
}

#[test]
fn test_out_of_range_values_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[schedule]\nwarning_threshold = 1.2").unwrap();

    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("CLIPCAST_FINAL_DAILY_LIMIT", "3");
    std::env::set_var("CLIPCAST_PREFERRED_TIMES", "09:30, 18:00,");
    std::env::set_var("CLIPCAST_UTC_OFFSET_MINUTES", "-300");
    std::env::set_var("CLIPCAST_SQLITE_PATH", "/tmp/clipcast-test.db");
    std::env::set_var("CLIPCAST_PLATFORM_TOKEN", "token");

    let config = AppConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.schedule.daily_limits.final_videos, 3);
    assert_eq!(config.schedule.preferred_times, vec!["09:30", "18:00"]);
    assert_eq!(config.schedule.offset().unwrap().local_minus_utc(), -300 * 60);
    assert_eq!(
        config.database.sqlite_path,
        std::path::PathBuf::from("/tmp/clipcast-test.db")
    );
    assert_eq!(config.degraded.platform_token.as_deref(), Some("token"));
    config.validate().unwrap();
}

#[test]
#[serial]
fn test_unparseable_env_value_ignored() {
    clear_env();
    std::env::set_var("CLIPCAST_UPLOAD_COST", "lots");

    let config = AppConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.schedule.upload_cost, 1600);
}
