//! Schedule store
//!
//! Persists one record per scheduled artifact and runs the admission
//! sequence: lock → pick or validate a slot → check quota → reserve →
//! insert → commit. Everything from the lock to the insert happens in one
//! immediate transaction, so a failure at any step leaves no partial
//! reservation and no orphaned record.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use super::allocator::{to_minute, SlotAllocator, SlotSource};
use super::error::{SchedulerError, SchedulerResult};
use super::quota::QuotaLedger;
use crate::config::ScheduleConfig;
use crate::models::{CalendarEntry, ScheduledUpload, UploadStatus, VideoType};
use crate::storage::Database;

const SLOT_FORMAT: &str = "%H:%M";
const CANCEL_NOTE: &str = "Cancelled by operator";

// ============================================================================
// Results
// ============================================================================

/// A committed schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scheduled {
    pub id: i64,
    pub video_path: String,
    pub video_type: VideoType,
    pub scheduled_time: DateTime<FixedOffset>,
    /// True when a requested time collided and a same-day alternative was used
    pub adjusted: bool,
    pub message: String,
}

/// Flat `(success, message, time)` result for collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleReport {
    pub success: bool,
    pub message: String,
    pub scheduled_time: Option<DateTime<FixedOffset>>,
    /// Served by the degraded path
    pub degraded: bool,
    /// Failure kind, when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl From<SchedulerResult<Scheduled>> for ScheduleReport {
    fn from(result: SchedulerResult<Scheduled>) -> Self {
        match result {
            Ok(scheduled) => Self {
                success: true,
                message: scheduled.message,
                scheduled_time: Some(scheduled.scheduled_time),
                degraded: false,
                error_kind: None,
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                scheduled_time: None,
                degraded: false,
                error_kind: Some(format!("{:?}", e.kind())),
            },
        }
    }
}

// ============================================================================
// Occupancy view
// ============================================================================

/// Allocator view over a connection (or the open transaction)
struct StoreView<'a> {
    conn: &'a Connection,
    ledger: &'a QuotaLedger,
}

impl SlotSource for StoreView<'_> {
    fn remaining(&self, day: NaiveDate, video_type: VideoType) -> SchedulerResult<u32> {
        Ok(self.ledger.status_with(self.conn, day)?.remaining(video_type))
    }

    fn occupied(&self, day: NaiveDate) -> SchedulerResult<HashSet<NaiveTime>> {
        occupied_times(self.conn, day)
    }
}

fn occupied_times(conn: &Connection, day: NaiveDate) -> SchedulerResult<HashSet<NaiveTime>> {
    let mut stmt = conn.prepare(
        "SELECT publish_slot FROM scheduled_uploads
          WHERE publish_date = ?1
            AND upload_status IN ('scheduled', 'uploading', 'completed')",
    )?;

    let slots = stmt
        .query_map(params![day.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(slots
        .iter()
        .filter_map(|s| NaiveTime::parse_from_str(s, SLOT_FORMAT).ok())
        .collect())
}

// ============================================================================
// Schedule Store
// ============================================================================

/// Persistent schedule with quota-checked admission
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    db: Database,
    ledger: QuotaLedger,
    allocator: SlotAllocator,
    offset: FixedOffset,
    upload_cost: u32,
    release_quota_on_cancel: bool,
}

impl ScheduleStore {
    /// Create a store over `db`
    pub fn new(db: Database, config: &ScheduleConfig) -> SchedulerResult<Self> {
        let offset = config
            .offset()
            .map_err(|e| SchedulerError::invalid_config("utc_offset_minutes", e.to_string()))?;

        Ok(Self {
            ledger: QuotaLedger::new(db.clone(), config),
            allocator: SlotAllocator::new(config, offset),
            db,
            offset,
            upload_cost: config.upload_cost,
            release_quota_on_cancel: config.release_quota_on_cancel,
        })
    }

    /// Quota ledger sharing this store's database
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Slot allocator in use
    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    /// Current time in the publishing timezone
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Check that the backing store is reachable
    pub fn ping(&self) -> SchedulerResult<()> {
        self.db.ping()
    }

    /// Suggest a slot without reserving it
    pub fn next_slot(
        &self,
        video_type: VideoType,
        preferred_date: Option<NaiveDate>,
    ) -> SchedulerResult<DateTime<FixedOffset>> {
        let now = self.now();
        self.db.read("next_slot", |conn| {
            let view = StoreView {
                conn,
                ledger: &self.ledger,
            };
            self.allocator.next_slot(&view, video_type, preferred_date, now)
        })
    }

    /// Schedule an artifact at the current time
    pub fn schedule(
        &self,
        video_path: &str,
        video_type: VideoType,
        preferred_time: Option<DateTime<FixedOffset>>,
    ) -> SchedulerResult<Scheduled> {
        self.schedule_at(self.now(), video_path, video_type, preferred_time)
    }

    /// Schedule an artifact as of `now`
    ///
    /// A requested time that collides is resolved once, and only to an
    /// alternative on the same calendar day.
    pub fn schedule_at(
        &self,
        now: DateTime<FixedOffset>,
        video_path: &str,
        video_type: VideoType,
        preferred_time: Option<DateTime<FixedOffset>>,
    ) -> SchedulerResult<Scheduled> {
        let now = now.with_timezone(&self.offset);
        let preferred_time = preferred_time.map(|t| t.with_timezone(&self.offset));

        if let Some(requested) = preferred_time {
            if requested <= now {
                return Err(SchedulerError::PastPublishTime { requested });
            }
        }

        let result = self.db.write("schedule", |tx| {
            if let Some(existing) = active_for_path(tx, video_path, self.offset)? {
                return Err(SchedulerError::AlreadyScheduled {
                    video_path: video_path.to_string(),
                    scheduled_time: existing.scheduled_publish_time,
                });
            }

            let view = StoreView {
                conn: tx,
                ledger: &self.ledger,
            };

            let (publish_at, adjusted) = match preferred_time {
                Some(requested) => {
                    let day = requested.date_naive();
                    let occupied = occupied_times(tx, day)?;

                    if occupied.contains(&to_minute(requested.time())) {
                        let alternative =
                            self.allocator
                                .next_slot(&view, video_type, Some(day), now)?;
                        if alternative.date_naive() != day {
                            return Err(SchedulerError::SlotConflict {
                                requested,
                                alternative,
                            });
                        }
                        tracing::info!(
                            video_path,
                            requested = %requested,
                            alternative = %alternative,
                            "Requested slot taken, using same-day alternative"
                        );
                        (alternative, true)
                    } else {
                        (requested, false)
                    }
                }
                None => {
                    let slot = self.allocator.next_slot(&view, video_type, None, now)?;
                    // only the last-resort slot can already be taken here
                    if occupied_times(tx, slot.date_naive())?.contains(&to_minute(slot.time())) {
                        return Err(SchedulerError::NoSlotAvailable {
                            date: slot.date_naive(),
                        });
                    }
                    (slot, false)
                }
            };

            let target_day = publish_at.date_naive();
            let mut locked = self.ledger.check_locked(tx, target_day)?;
            locked.ensure_capacity(video_type, self.upload_cost)?;
            self.ledger
                .reserve(&mut locked, video_type, self.upload_cost)?;

            let id = insert_upload(tx, video_path, video_type, publish_at)?;
            let status = locked.status();

            let message = format!(
                "Scheduled {video_type} video for {} ({}/{} {video_type} slots used on {target_day}, quota {}/{})",
                publish_at.format("%Y-%m-%d %H:%M %:z"),
                status.used(video_type),
                status.limit(video_type),
                status.quota_used,
                status.quota_limit,
            );

            Ok(Scheduled {
                id,
                video_path: video_path.to_string(),
                video_type,
                scheduled_time: publish_at,
                adjusted,
                message,
            })
        });

        match &result {
            Ok(scheduled) => tracing::info!(
                id = scheduled.id,
                video_path,
                video_type = %video_type,
                scheduled_time = %scheduled.scheduled_time,
                "Upload scheduled"
            ),
            Err(e) => tracing::warn!(
                video_path,
                video_type = %video_type,
                kind = ?e.kind(),
                error = %e,
                "Scheduling failed"
            ),
        }

        result
    }

    /// `scheduled → uploading`; false when the record is missing or not scheduled
    pub fn mark_uploading(&self, video_path: &str) -> SchedulerResult<bool> {
        self.transition(video_path, UploadStatus::Uploading, None, None)
    }

    /// Record the outcome of the publish action
    ///
    /// A missing record or an illegal transition is logged and reported as
    /// `false`; it never raises.
    pub fn update_with_external_id(
        &self,
        video_path: &str,
        external_id: Option<&str>,
        status: UploadStatus,
    ) -> SchedulerResult<bool> {
        self.transition(video_path, status, external_id, None)
    }

    /// Mark the upload failed with a reason
    pub fn record_failure(&self, video_path: &str, message: &str) -> SchedulerResult<bool> {
        self.transition(video_path, UploadStatus::Failed, None, Some(message))
    }

    fn transition(
        &self,
        video_path: &str,
        next: UploadStatus,
        external_id: Option<&str>,
        error_message: Option<&str>,
    ) -> SchedulerResult<bool> {
        self.db.write("update_status", |tx| {
            let Some(current) = latest_for_path(tx, video_path, self.offset)? else {
                tracing::warn!(video_path, status = %next, "No schedule record to update");
                return Ok(false);
            };

            if !current.upload_status.can_transition_to(next) {
                tracing::warn!(
                    id = current.id,
                    video_path,
                    from = %current.upload_status,
                    to = %next,
                    "Rejected illegal status transition"
                );
                return Ok(false);
            }

            tx.execute(
                "UPDATE scheduled_uploads
                    SET upload_status = ?2,
                        external_id = COALESCE(?3, external_id),
                        error_message = COALESCE(?4, error_message),
                        updated_at = ?5
                  WHERE id = ?1",
                params![
                    current.id,
                    next.as_str(),
                    external_id,
                    error_message,
                    Utc::now().to_rfc3339()
                ],
            )?;

            tracing::info!(
                id = current.id,
                video_path,
                from = %current.upload_status,
                to = %next,
                external_id = ?external_id,
                "Upload status updated"
            );
            Ok(true)
        })
    }

    /// Cancel a schedule that has not started uploading
    ///
    /// Whether the day's reservation is given back follows the
    /// `release_quota_on_cancel` policy.
    pub fn cancel(&self, schedule_id: i64) -> SchedulerResult<bool> {
        self.db.write("cancel", |tx| {
            let Some(upload) = load_by_id(tx, schedule_id, self.offset)? else {
                tracing::warn!(id = schedule_id, "Cancel requested for unknown schedule");
                return Ok(false);
            };

            if upload.upload_status != UploadStatus::Scheduled {
                tracing::warn!(
                    id = schedule_id,
                    status = %upload.upload_status,
                    "Only scheduled uploads can be cancelled"
                );
                return Ok(false);
            }

            tx.execute(
                "UPDATE scheduled_uploads
                    SET upload_status = 'failed', error_message = ?2, updated_at = ?3
                  WHERE id = ?1",
                params![schedule_id, CANCEL_NOTE, Utc::now().to_rfc3339()],
            )?;

            if self.release_quota_on_cancel {
                let day = upload.scheduled_publish_time.date_naive();
                let mut locked = self.ledger.check_locked(tx, day)?;
                self.ledger
                    .release(&mut locked, upload.video_type, self.upload_cost)?;
            }

            tracing::info!(
                id = schedule_id,
                video_path = %upload.video_path,
                released = self.release_quota_on_cancel,
                "Schedule cancelled"
            );
            Ok(true)
        })
    }

    /// Look up by surrogate id
    pub fn get(&self, schedule_id: i64) -> SchedulerResult<Option<ScheduledUpload>> {
        self.db
            .read("get", |conn| load_by_id(conn, schedule_id, self.offset))
    }

    /// Latest record for a path
    pub fn get_by_path(&self, video_path: &str) -> SchedulerResult<Option<ScheduledUpload>> {
        self.db
            .read("get_by_path", |conn| latest_for_path(conn, video_path, self.offset))
    }

    /// Scheduled uploads whose publish time has arrived
    pub fn due_uploads(&self, now: DateTime<FixedOffset>) -> SchedulerResult<Vec<ScheduledUpload>> {
        self.db.read("due_uploads", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_UPLOAD} WHERE upload_status = 'scheduled' ORDER BY scheduled_publish_time, id"
            ))?;
            let uploads = stmt
                .query_map([], |row| map_upload(row, self.offset))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(uploads
                .into_iter()
                .filter(|u| u.scheduled_publish_time <= now)
                .collect())
        })
    }

    /// Schedules grouped by date, for display
    ///
    /// Takes no lock; may lag in-flight reservations.
    pub fn calendar(
        &self,
        start_date: NaiveDate,
        days: u32,
    ) -> SchedulerResult<BTreeMap<NaiveDate, Vec<CalendarEntry>>> {
        let end_date = start_date + Duration::days(i64::from(days.max(1)) - 1);

        self.db.read("calendar", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_UPLOAD} WHERE publish_date BETWEEN ?1 AND ?2
                 ORDER BY publish_date, publish_slot, id"
            ))?;
            let uploads = stmt
                .query_map(params![start_date.to_string(), end_date.to_string()], |row| {
                    map_upload(row, self.offset)
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut calendar: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();
            for upload in uploads {
                calendar
                    .entry(upload.scheduled_publish_time.date_naive())
                    .or_default()
                    .push(upload.into());
            }
            Ok(calendar)
        })
    }
}

// ============================================================================
// Row helpers
// ============================================================================

const SELECT_UPLOAD: &str = "SELECT id, video_path, video_type, scheduled_publish_time, upload_status,
        external_id, error_message, created_at, updated_at
   FROM scheduled_uploads";

fn insert_upload(
    conn: &Connection,
    video_path: &str,
    video_type: VideoType,
    publish_at: DateTime<FixedOffset>,
) -> SchedulerResult<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scheduled_uploads (
            video_path, video_type, scheduled_publish_time, publish_date, publish_slot,
            upload_status, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, ?6)",
        params![
            video_path,
            video_type.as_str(),
            publish_at.to_rfc3339(),
            publish_at.date_naive().to_string(),
            publish_at.format(SLOT_FORMAT).to_string(),
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_by_id(
    conn: &Connection,
    id: i64,
    offset: FixedOffset,
) -> SchedulerResult<Option<ScheduledUpload>> {
    Ok(conn
        .query_row(&format!("{SELECT_UPLOAD} WHERE id = ?1"), params![id], |row| {
            map_upload(row, offset)
        })
        .optional()?)
}

fn latest_for_path(
    conn: &Connection,
    video_path: &str,
    offset: FixedOffset,
) -> SchedulerResult<Option<ScheduledUpload>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_UPLOAD} WHERE video_path = ?1 ORDER BY id DESC LIMIT 1"),
            params![video_path],
            |row| map_upload(row, offset),
        )
        .optional()?)
}

fn active_for_path(
    conn: &Connection,
    video_path: &str,
    offset: FixedOffset,
) -> SchedulerResult<Option<ScheduledUpload>> {
    Ok(latest_for_path(conn, video_path, offset)?.filter(|u| u.upload_status.is_active()))
}

fn parse_column<T, E: std::fmt::Display>(
    index: usize,
    value: Result<T, E>,
) -> rusqlite::Result<T> {
    value.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn map_upload(row: &Row<'_>, offset: FixedOffset) -> rusqlite::Result<ScheduledUpload> {
    let video_type: String = row.get(2)?;
    let publish_time: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(ScheduledUpload {
        id: row.get(0)?,
        video_path: row.get(1)?,
        video_type: parse_column(2, video_type.parse::<VideoType>())?,
        scheduled_publish_time: parse_column(3, DateTime::parse_from_rfc3339(&publish_time))?
            .with_timezone(&offset),
        upload_status: parse_column(4, status.parse::<UploadStatus>())?,
        external_id: row.get(5)?,
        error_message: row.get(6)?,
        created_at: parse_column(7, DateTime::parse_from_rfc3339(&created_at))?
            .with_timezone(&Utc),
        updated_at: parse_column(8, DateTime::parse_from_rfc3339(&updated_at))?
            .with_timezone(&Utc),
    })
}
