//! Failover between the primary store and degraded mode
//!
//! [`PublishScheduler`] tries the primary [`ScheduleStore`] first. When the
//! store cannot be reached it is marked unavailable and requests are served
//! by the [`DegradedScheduler`] until a probe succeeds again. Business
//! rejections and lock timeouts never fall through to degraded mode.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::degraded::DegradedScheduler;
use super::error::{SchedulerError, SchedulerResult};
use super::store::{ScheduleReport, ScheduleStore};
use crate::models::VideoType;

// ============================================================================
// Store Health
// ============================================================================

/// Reachability of the primary store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StoreHealth {
    /// Requests go to the primary store
    #[default]
    Available,
    /// Requests are served in degraded mode
    Unavailable,
}

/// Health record for the primary store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Current status
    pub status: StoreHealth,

    /// Consecutive unreachable errors
    pub failure_count: u32,

    /// Last error message
    pub last_error: Option<String>,

    /// When status was last updated
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            status: StoreHealth::Available,
            failure_count: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    fn record_success(&mut self) {
        if self.status == StoreHealth::Unavailable {
            tracing::info!(failures = self.failure_count, "Primary store reachable again");
        }
        self.status = StoreHealth::Available;
        self.failure_count = 0;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    fn record_failure(&mut self, error: &SchedulerError) {
        if self.status == StoreHealth::Available {
            tracing::warn!(error = %error, "Primary store unreachable, switching to degraded mode");
        }
        self.status = StoreHealth::Unavailable;
        self.failure_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    fn due_for_recheck(&self, interval: Duration) -> bool {
        let elapsed = (Utc::now() - self.updated_at).to_std().unwrap_or_default();
        elapsed >= interval
    }
}

// ============================================================================
// Publish Scheduler
// ============================================================================

/// Schedules against the primary store with degraded-mode fallback
pub struct PublishScheduler {
    store: Arc<ScheduleStore>,
    degraded: Arc<DegradedScheduler>,
    health: RwLock<HealthRecord>,
    recheck_interval: Duration,
}

impl PublishScheduler {
    /// Create a scheduler over both paths
    pub fn new(store: Arc<ScheduleStore>, degraded: Arc<DegradedScheduler>) -> Self {
        Self {
            store,
            degraded,
            health: RwLock::new(HealthRecord::new()),
            recheck_interval: Duration::from_secs(30),
        }
    }

    /// How long to stay degraded before trying the primary again
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Primary store
    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    /// Degraded-mode scheduler
    pub fn degraded(&self) -> &Arc<DegradedScheduler> {
        &self.degraded
    }

    /// Current store health
    pub async fn health(&self) -> StoreHealth {
        self.health.read().await.status
    }

    /// Full health record
    pub async fn health_record(&self) -> HealthRecord {
        self.health.read().await.clone()
    }

    /// Re-check the primary store
    pub async fn probe(&self) -> StoreHealth {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || store.ping())
            .await
            .unwrap_or_else(|e| Err(SchedulerError::storage("ping", e.to_string())));

        let mut health = self.health.write().await;
        match result {
            Err(e) if e.is_store_unreachable() => health.record_failure(&e),
            Err(e) => {
                tracing::warn!(error = %e, "Primary store answered the probe with an error");
                health.record_success();
            }
            Ok(()) => health.record_success(),
        }
        health.status
    }

    /// Schedule as of the current time
    pub async fn schedule(
        &self,
        video_path: &str,
        video_type: VideoType,
        preferred_time: Option<DateTime<FixedOffset>>,
    ) -> ScheduleReport {
        self.schedule_at(self.store.now(), video_path, video_type, preferred_time)
            .await
    }

    /// Schedule as of `now`, falling back to degraded mode when the primary
    /// store is unreachable
    pub async fn schedule_at(
        &self,
        now: DateTime<FixedOffset>,
        video_path: &str,
        video_type: VideoType,
        preferred_time: Option<DateTime<FixedOffset>>,
    ) -> ScheduleReport {
        let skip_primary = {
            let health = self.health.read().await;
            health.status == StoreHealth::Unavailable
                && !health.due_for_recheck(self.recheck_interval)
        };

        if skip_primary {
            let reason = self
                .health
                .read()
                .await
                .last_error
                .clone()
                .unwrap_or_default();
            return self
                .schedule_degraded(now, video_path, video_type, preferred_time, &reason)
                .await;
        }

        let store = Arc::clone(&self.store);
        let path = video_path.to_string();
        let result = tokio::task::spawn_blocking(move || {
            store.schedule_at(now, &path, video_type, preferred_time)
        })
        .await
        .unwrap_or_else(|e| Err(SchedulerError::storage("schedule", e.to_string())));

        match result {
            Err(e) if e.is_store_unreachable() => {
                self.health.write().await.record_failure(&e);
                self.schedule_degraded(now, video_path, video_type, preferred_time, &e.to_string())
                    .await
            }
            other => {
                if other.is_ok() {
                    self.health.write().await.record_success();
                }
                ScheduleReport::from(other)
            }
        }
    }

    async fn schedule_degraded(
        &self,
        now: DateTime<FixedOffset>,
        video_path: &str,
        video_type: VideoType,
        preferred_time: Option<DateTime<FixedOffset>>,
        reason: &str,
    ) -> ScheduleReport {
        if let Some(requested) = preferred_time {
            if requested <= now {
                return ScheduleReport::from(Err(SchedulerError::PastPublishTime { requested }));
            }
        }

        let scheduled_time = match preferred_time {
            Some(requested) if self.degraded.claim_at(requested).await => requested,
            Some(requested) => {
                let day = requested.date_naive();
                match self.degraded.claim_on_day(day, now).await {
                    Some(alternative) => {
                        tracing::info!(
                            video_path,
                            requested = %requested,
                            alternative = %alternative,
                            "Requested bucket full, using same-day alternative in degraded mode"
                        );
                        alternative
                    }
                    None => {
                        let alternative = self.degraded.next_slot(now).await;
                        let mut report = ScheduleReport::from(Err(SchedulerError::SlotConflict {
                            requested,
                            alternative,
                        }));
                        report.degraded = true;
                        return report;
                    }
                }
            }
            None => self.degraded.claim_next(now).await,
        };

        tracing::warn!(
            video_path,
            video_type = %video_type,
            scheduled_time = %scheduled_time,
            "Scheduled in degraded mode"
        );

        ScheduleReport {
            success: true,
            message: format!(
                "Scheduled {video_type} video for {} in degraded mode (primary store unavailable: {reason})",
                scheduled_time.format("%Y-%m-%d %H:%M %:z")
            ),
            scheduled_time: Some(scheduled_time),
            degraded: true,
            error_kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DegradedConfig, ScheduleConfig};
    use crate::scheduler::allocator::local_datetime;
    use crate::scheduler::platform::PlatformListing;
    use crate::storage::Database;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    struct EmptyListing;

    #[async_trait]
    impl PlatformListing for EmptyListing {
        async fn scheduled_publish_times(&self) -> SchedulerResult<Vec<DateTime<FixedOffset>>> {
            Ok(vec![])
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(h: u32) -> DateTime<FixedOffset> {
        local_datetime(
            NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            utc(),
        )
    }

    fn setup() -> (TempDir, PublishScheduler) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_path(dir.path().join("schedule.db"), Duration::from_secs(5))
            .unwrap();
        let store = ScheduleStore::new(db, &ScheduleConfig::default()).unwrap();
        let degraded =
            DegradedScheduler::new(&DegradedConfig::default(), utc(), Arc::new(EmptyListing))
                .unwrap()
                .without_cache_file();
        (dir, PublishScheduler::new(Arc::new(store), Arc::new(degraded)))
    }

    #[tokio::test]
    async fn test_primary_path() {
        let (_dir, scheduler) = setup();
        let report = scheduler
            .schedule_at(at(8), "a.mp4", VideoType::Final, None)
            .await;

        assert!(report.success);
        assert!(!report.degraded);
        assert_eq!(report.scheduled_time, Some(at(10)));
        assert_eq!(scheduler.health().await, StoreHealth::Available);
    }

    #[tokio::test]
    async fn test_rejection_does_not_fail_over() {
        let (_dir, scheduler) = setup();
        let report = scheduler
            .schedule_at(at(12), "a.mp4", VideoType::Final, Some(at(9)))
            .await;

        assert!(!report.success);
        assert!(!report.degraded);
        assert_eq!(report.error_kind.as_deref(), Some("Rejected"));
        assert_eq!(scheduler.health().await, StoreHealth::Available);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_over() {
        let (dir, scheduler) = setup();
        drop(dir);

        let report = scheduler
            .schedule_at(at(7), "a.mp4", VideoType::Short, None)
            .await;
        assert!(report.success);
        assert!(report.degraded);
        assert!(report.message.contains("degraded mode"));
        assert_eq!(report.scheduled_time, Some(at(12)));
        assert_eq!(scheduler.health().await, StoreHealth::Unavailable);

        // second call in the same batch lands in the next bucket
        let report = scheduler
            .schedule_at(at(7), "b.mp4", VideoType::Short, None)
            .await;
        assert_eq!(report.scheduled_time, Some(at(18)));

        assert_eq!(scheduler.probe().await, StoreHealth::Unavailable);
        assert_eq!(scheduler.health_record().await.failure_count, 2);
    }

    #[tokio::test]
    async fn test_full_requested_day_is_a_conflict() {
        let (dir, scheduler) = setup();
        drop(dir);
        let now = at(7);
        let day = |h| at(h) + chrono::Duration::days(1);

        for (i, hour) in [0, 6, 12, 18].into_iter().enumerate() {
            let report = scheduler
                .schedule_at(now, &format!("{i}.mp4"), VideoType::Short, Some(day(hour)))
                .await;
            assert_eq!(report.scheduled_time, Some(day(hour)));
        }

        let report = scheduler
            .schedule_at(now, "late.mp4", VideoType::Short, Some(day(13)))
            .await;
        assert!(!report.success);
        assert!(report.degraded);
        assert_eq!(report.error_kind.as_deref(), Some("Rejected"));
        assert!(report.scheduled_time.is_none());
    }
}
