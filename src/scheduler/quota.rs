//! Per-day quota ledger
//!
//! Owns the `daily_quota` table. Usage counters only ever grow through
//! [`QuotaLedger::reserve`], which needs a [`LockedDay`]; the only way to get
//! one is [`QuotaLedger::check_locked`] inside a write transaction, so the
//! lock → check → reserve → commit pairing is enforced by the type system.

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::error::{SchedulerError, SchedulerResult};
use crate::config::{DailyLimits, ScheduleConfig};
use crate::models::{DailyQuotaRecord, QuotaStatus, VideoType};
use crate::storage::Database;

// ============================================================================
// Locked Day
// ============================================================================

/// A day's quota row read under the write lock
///
/// Borrowing the transaction ties the reservation to the same lock scope
/// as the read it was validated against.
pub struct LockedDay<'a, 'c> {
    tx: &'a Transaction<'c>,
    record: DailyQuotaRecord,
    limits: DailyLimits,
}

impl LockedDay<'_, '_> {
    /// Locked calendar date
    pub fn date(&self) -> NaiveDate {
        self.record.date
    }

    /// Current counters, including reservations made through this guard
    pub fn record(&self) -> &DailyQuotaRecord {
        &self.record
    }

    /// Remaining capacity
    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_record(
            &self.record,
            self.limits.final_videos,
            self.limits.short_videos,
        )
    }

    /// Verify one more publish of `video_type` costing `cost` fits the day
    pub fn ensure_capacity(&self, video_type: VideoType, cost: u32) -> SchedulerResult<()> {
        let status = self.status();

        if status.remaining(video_type) == 0 {
            return Err(SchedulerError::QuotaExhausted {
                video_type,
                date: status.date,
                used: status.used(video_type),
                limit: status.limit(video_type),
            });
        }

        if status.quota_remaining < cost {
            return Err(SchedulerError::BudgetExhausted {
                date: status.date,
                used: status.quota_used,
                limit: status.quota_limit,
                remaining: status.quota_remaining,
                cost,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Quota Ledger
// ============================================================================

/// Reads and reserves per-day publish quota
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    db: Database,
    limits: DailyLimits,
    quota_limit: u32,
    warning_threshold: f64,
}

impl QuotaLedger {
    /// Create a ledger over `db` with the given policy
    pub fn new(db: Database, config: &ScheduleConfig) -> Self {
        Self {
            db,
            limits: config.daily_limits,
            quota_limit: config.quota_limit,
            warning_threshold: config.warning_threshold,
        }
    }

    /// Daily caps in effect
    pub fn limits(&self) -> DailyLimits {
        self.limits
    }

    /// Read a day's status without locking
    ///
    /// An unreachable store yields the conservative default (nothing used,
    /// everything remaining) so display surfaces keep working. Never use
    /// this result to admit a publish; that goes through [`Self::check_locked`].
    pub fn check(&self, date: NaiveDate) -> QuotaStatus {
        match self.try_check(date) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(date = %date, error = %e, "Quota read failed, using default status");
                self.status_of(&DailyQuotaRecord::empty(date, self.quota_limit))
            }
        }
    }

    /// Read a day's status, propagating store failures
    pub fn try_check(&self, date: NaiveDate) -> SchedulerResult<QuotaStatus> {
        self.db
            .read("quota_check", |conn| self.status_with(conn, date))
    }

    /// Status through an existing connection or transaction
    pub(crate) fn status_with(&self, conn: &Connection, date: NaiveDate) -> SchedulerResult<QuotaStatus> {
        let record = load_record(conn, date)?
            .unwrap_or_else(|| DailyQuotaRecord::empty(date, self.quota_limit));
        Ok(self.status_of(&record))
    }

    /// Lazily create and read a day's row inside the write transaction
    pub fn check_locked<'a, 'c>(
        &self,
        tx: &'a Transaction<'c>,
        date: NaiveDate,
    ) -> SchedulerResult<LockedDay<'a, 'c>> {
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT OR IGNORE INTO daily_quota (date, quota_limit, updated_at) VALUES (?1, ?2, ?3)",
            params![date.to_string(), self.quota_limit, now],
        )?;
        tx.execute(
            "UPDATE daily_quota SET quota_limit = ?2 WHERE date = ?1 AND quota_limit != ?2",
            params![date.to_string(), self.quota_limit],
        )?;

        let record = load_record(tx, date)?.ok_or_else(|| {
            SchedulerError::storage("check_locked", format!("quota row for {date} vanished"))
        })?;

        Ok(LockedDay {
            tx,
            record,
            limits: self.limits,
        })
    }

    /// Charge one publish of `video_type` to the locked day
    pub fn reserve(
        &self,
        day: &mut LockedDay<'_, '_>,
        video_type: VideoType,
        cost: u32,
    ) -> SchedulerResult<()> {
        day.ensure_capacity(video_type, cost)?;

        let column = video_type.counter_column();
        let sql = format!(
            "UPDATE daily_quota
                SET quota_used = quota_used + ?2,
                    upload_count = upload_count + 1,
                    {column} = {column} + 1,
                    updated_at = ?3
              WHERE date = ?1"
        );
        let updated = day.tx.execute(
            &sql,
            params![day.date().to_string(), cost, Utc::now().to_rfc3339()],
        )?;
        if updated != 1 {
            return Err(SchedulerError::storage(
                "reserve",
                format!("expected one quota row for {}, updated {updated}", day.date()),
            ));
        }

        day.record.quota_used += cost;
        day.record.upload_count += 1;
        match video_type {
            VideoType::Final => day.record.final_uploaded += 1,
            VideoType::Short => day.record.short_uploaded += 1,
        }

        tracing::debug!(
            date = %day.date(),
            video_type = %video_type,
            cost,
            quota_used = day.record.quota_used,
            "Quota reserved"
        );
        Ok(())
    }

    /// Give back a reservation; counters floor at zero
    pub fn release(
        &self,
        day: &mut LockedDay<'_, '_>,
        video_type: VideoType,
        cost: u32,
    ) -> SchedulerResult<()> {
        let column = video_type.counter_column();
        let sql = format!(
            "UPDATE daily_quota
                SET quota_used = MAX(quota_used - ?2, 0),
                    upload_count = MAX(upload_count - 1, 0),
                    {column} = MAX({column} - 1, 0),
                    updated_at = ?3
              WHERE date = ?1"
        );
        day.tx.execute(
            &sql,
            params![day.date().to_string(), cost, Utc::now().to_rfc3339()],
        )?;

        day.record.quota_used = day.record.quota_used.saturating_sub(cost);
        day.record.upload_count = day.record.upload_count.saturating_sub(1);
        match video_type {
            VideoType::Final => {
                day.record.final_uploaded = day.record.final_uploaded.saturating_sub(1)
            }
            VideoType::Short => {
                day.record.short_uploaded = day.record.short_uploaded.saturating_sub(1)
            }
        }

        tracing::info!(date = %day.date(), video_type = %video_type, cost, "Quota released");
        Ok(())
    }

    /// Operator-facing warnings for a day
    pub fn warnings(&self, date: NaiveDate) -> Vec<String> {
        let status = self.check(date);
        let mut warnings = Vec::new();

        if status.quota_percentage >= self.warning_threshold * 100.0 {
            warnings.push(format!(
                "API quota at {:.1}% on {} ({}/{} units used)",
                status.quota_percentage, date, status.quota_used, status.quota_limit
            ));
        }

        for video_type in VideoType::all() {
            match status.remaining(video_type) {
                0 => warnings.push(format!(
                    "No {video_type} video slots left on {date} (used {}/{})",
                    status.used(video_type),
                    status.limit(video_type)
                )),
                1 => warnings.push(format!(
                    "Only 1 {video_type} video slot left on {date} (used {}/{})",
                    status.used(video_type),
                    status.limit(video_type)
                )),
                _ => {}
            }
        }

        warnings
    }

    /// Stored record for a day (zeros if never touched)
    pub fn record(&self, date: NaiveDate) -> SchedulerResult<DailyQuotaRecord> {
        self.db.read("quota_record", |conn| {
            Ok(load_record(conn, date)?
                .unwrap_or_else(|| DailyQuotaRecord::empty(date, self.quota_limit)))
        })
    }

    /// Records for `days` consecutive dates starting at `start`
    pub fn history(&self, start: NaiveDate, days: u32) -> SchedulerResult<Vec<DailyQuotaRecord>> {
        self.db.read("quota_history", |conn| {
            (0..i64::from(days))
                .map(|offset| {
                    let date = start + Duration::days(offset);
                    Ok(load_record(conn, date)?
                        .unwrap_or_else(|| DailyQuotaRecord::empty(date, self.quota_limit)))
                })
                .collect()
        })
    }

    fn status_of(&self, record: &DailyQuotaRecord) -> QuotaStatus {
        let record = DailyQuotaRecord {
            quota_limit: self.quota_limit,
            ..record.clone()
        };
        QuotaStatus::from_record(&record, self.limits.final_videos, self.limits.short_videos)
    }
}

fn load_record(conn: &Connection, date: NaiveDate) -> SchedulerResult<Option<DailyQuotaRecord>> {
    let record = conn
        .query_row(
            "SELECT quota_used, quota_limit, upload_count, final_uploaded, short_uploaded
               FROM daily_quota WHERE date = ?1",
            params![date.to_string()],
            |row| {
                Ok(DailyQuotaRecord {
                    date,
                    quota_used: row.get(0)?,
                    quota_limit: row.get(1)?,
                    upload_count: row.get(2)?,
                    final_uploaded: row.get(3)?,
                    short_uploaded: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn setup(config: &ScheduleConfig) -> (TempDir, Database, QuotaLedger) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_path(dir.path().join("quota.db"), StdDuration::from_secs(5))
            .unwrap();
        let ledger = QuotaLedger::new(db.clone(), config);
        (dir, db, ledger)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_check_fresh_day() {
        let (_dir, _db, ledger) = setup(&ScheduleConfig::default());
        let status = ledger.check(day());
        assert_eq!(status.final_remaining, 2);
        assert_eq!(status.short_remaining, 5);
        assert_eq!(status.quota_remaining, 10_000);
        assert_eq!(status.quota_percentage, 0.0);
    }

    #[test]
    fn test_reserve_increments_counters() {
        let (_dir, db, ledger) = setup(&ScheduleConfig::default());

        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, day())?;
            ledger.reserve(&mut locked, VideoType::Final, 1600)?;
            ledger.reserve(&mut locked, VideoType::Short, 1600)?;
            Ok(())
        })
        .unwrap();

        let record = ledger.record(day()).unwrap();
        assert_eq!(record.quota_used, 3200);
        assert_eq!(record.upload_count, 2);
        assert_eq!(record.final_uploaded, 1);
        assert_eq!(record.short_uploaded, 1);
    }

    #[test]
    fn test_check_is_idempotent() {
        let (_dir, db, ledger) = setup(&ScheduleConfig::default());
        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, day())?;
            ledger.reserve(&mut locked, VideoType::Final, 1600)
        })
        .unwrap();

        let first = ledger.check(day());
        for _ in 0..5 {
            assert_eq!(ledger.check(day()), first);
        }
        assert_eq!(ledger.record(day()).unwrap().final_uploaded, 1);
    }

    #[test]
    fn test_reserve_rejects_over_cap() {
        let (_dir, db, ledger) = setup(&ScheduleConfig::default());

        let err = db
            .write("test", |tx| {
                let mut locked = ledger.check_locked(tx, day())?;
                ledger.reserve(&mut locked, VideoType::Final, 1600)?;
                ledger.reserve(&mut locked, VideoType::Final, 1600)?;
                ledger.reserve(&mut locked, VideoType::Final, 1600)
            })
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::QuotaExhausted { used: 2, limit: 2, .. }
        ));
        // whole transaction rolled back
        assert_eq!(ledger.record(day()).unwrap().final_uploaded, 0);
    }

    #[test]
    fn test_budget_boundary() {
        let config = ScheduleConfig {
            quota_limit: 3_199,
            ..Default::default()
        };
        let (_dir, db, ledger) = setup(&config);

        // 1599 remaining after one publish: rejected
        let err = db
            .write("test", |tx| {
                let mut locked = ledger.check_locked(tx, day())?;
                ledger.reserve(&mut locked, VideoType::Short, 1600)?;
                ledger.reserve(&mut locked, VideoType::Short, 1600)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::BudgetExhausted { remaining: 1599, cost: 1600, .. }
        ));

        let config = ScheduleConfig {
            quota_limit: 3_200,
            ..Default::default()
        };
        let (_dir, db, ledger) = setup(&config);

        // exactly 1600 remaining: accepted
        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, day())?;
            ledger.reserve(&mut locked, VideoType::Short, 1600)?;
            ledger.reserve(&mut locked, VideoType::Short, 1600)
        })
        .unwrap();
        assert_eq!(ledger.check(day()).quota_remaining, 0);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let (_dir, db, ledger) = setup(&ScheduleConfig::default());
        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, day())?;
            ledger.reserve(&mut locked, VideoType::Final, 1600)?;
            ledger.release(&mut locked, VideoType::Final, 1600)?;
            ledger.release(&mut locked, VideoType::Final, 1600)
        })
        .unwrap();

        let record = ledger.record(day()).unwrap();
        assert_eq!(record.quota_used, 0);
        assert_eq!(record.final_uploaded, 0);
        assert_eq!(record.upload_count, 0);
    }

    #[test]
    fn test_warnings() {
        let config = ScheduleConfig {
            quota_limit: 4_000,
            ..Default::default()
        };
        let (_dir, db, ledger) = setup(&config);
        assert!(ledger.warnings(day()).is_empty());

        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, day())?;
            ledger.reserve(&mut locked, VideoType::Final, 1600)?;
            ledger.reserve(&mut locked, VideoType::Final, 1600)
        })
        .unwrap();

        let warnings = ledger.warnings(day());
        assert!(warnings.iter().any(|w| w.contains("API quota at 80.0%")));
        assert!(warnings.iter().any(|w| w.contains("No final video slots left")));
        assert!(!warnings.iter().any(|w| w.contains("short")));
    }

    #[test]
    fn test_unreachable_store_reads_default() {
        let (dir, _db, ledger) = setup(&ScheduleConfig::default());
        drop(dir);

        assert!(ledger.try_check(day()).is_err());
        let status = ledger.check(day());
        assert_eq!(status.final_remaining, 2);
        assert_eq!(status.quota_remaining, 10_000);
    }

    #[test]
    fn test_history_fills_missing_days() {
        let (_dir, db, ledger) = setup(&ScheduleConfig::default());
        let second = day() + Duration::days(1);
        db.write("test", |tx| {
            let mut locked = ledger.check_locked(tx, second)?;
            ledger.reserve(&mut locked, VideoType::Short, 1600)
        })
        .unwrap();

        let history = ledger.history(day(), 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].upload_count, 0);
        assert_eq!(history[1].short_uploaded, 1);
        assert_eq!(history[2].date, day() + Duration::days(2));
    }
}
