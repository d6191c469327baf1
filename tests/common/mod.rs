//! Common test utilities

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use clipcast::config::ScheduleConfig;
use clipcast::scheduler::ScheduleStore;
use clipcast::storage::Database;
use std::time::Duration;
use tempfile::TempDir;

/// Publishing timezone used across tests (UTC+09:00)
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// A fixed future day so tests never depend on the wall clock
pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 4, 14).unwrap()
}

/// Local time on `day` in the test timezone
pub fn local(day: NaiveDate, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    kst()
        .from_local_datetime(&day.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap()))
        .unwrap()
}

/// Local time on the test day
pub fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    local(test_day(), hour, minute)
}

/// Schedule policy in the test timezone
pub fn schedule_config() -> ScheduleConfig {
    ScheduleConfig {
        utc_offset_minutes: 9 * 60,
        ..Default::default()
    }
}

/// Fresh store in a temp directory; keep the `TempDir` alive for the test
pub fn create_test_store(config: &ScheduleConfig) -> (TempDir, ScheduleStore) {
    let dir = TempDir::new().unwrap();
    let db = Database::open_path(dir.path().join("schedule.db"), Duration::from_secs(5)).unwrap();
    let store = ScheduleStore::new(db, config).unwrap();
    (dir, store)
}

/// Second handle on the same database, as another process would open it
#[allow(dead_code)]
pub fn reopen(dir: &TempDir, config: &ScheduleConfig) -> ScheduleStore {
    let db = Database::open_path(dir.path().join("schedule.db"), Duration::from_secs(5)).unwrap();
    ScheduleStore::new(db, config).unwrap()
}
