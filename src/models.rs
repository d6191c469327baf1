//! Core data structures for publish scheduling
//!
//! Content types, upload lifecycle states, the per-day quota record and the
//! per-artifact schedule record shared by the ledger, allocator and store.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::scheduler::error::{SchedulerError, SchedulerResult};

// ============================================================================
// Video Type
// ============================================================================

/// Content type classification of a finished video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    /// Full-length final cut
    Final,
    /// Short-form clip
    Short,
}

impl VideoType {
    /// Get all content types
    pub fn all() -> [Self; 2] {
        [Self::Final, Self::Short]
    }

    /// Get type ID as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Final => "final",
            Self::Short => "short",
        }
    }

    /// Parse from string
    pub fn from_id(id: &str) -> SchedulerResult<Self> {
        match id.trim().to_lowercase().as_str() {
            "final" => Ok(Self::Final),
            "short" => Ok(Self::Short),
            _ => Err(SchedulerError::InvalidVideoType {
                value: id.to_string(),
            }),
        }
    }

    /// Name of the per-type counter column in `daily_quota`
    pub(crate) fn counter_column(&self) -> &'static str {
        match self {
            Self::Final => "final_uploaded",
            Self::Short => "short_uploaded",
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for VideoType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s)
    }
}

// ============================================================================
// Upload Status
// ============================================================================

/// Lifecycle of a scheduled upload
///
/// `scheduled -> uploading -> {completed, failed}`, plus `scheduled -> failed`
/// on cancellation. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Scheduled,
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether a record in this state holds its publish slot
    pub fn occupies_slot(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Uploading | Self::Completed)
    }

    /// Whether the record is still waiting on the publish action
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Uploading)
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check a lifecycle transition
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Uploading)
                | (Self::Scheduled, Self::Failed)
                | (Self::Uploading, Self::Completed)
                | (Self::Uploading, Self::Failed)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(SchedulerError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Daily Quota Record
// ============================================================================

/// Usage counters for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuotaRecord {
    /// Calendar date (unique key)
    pub date: NaiveDate,

    /// Cumulative weighted API cost
    pub quota_used: u32,

    /// Weighted API budget for the day
    pub quota_limit: u32,

    /// Number of reservations made
    pub upload_count: u32,

    /// Final videos reserved
    pub final_uploaded: u32,

    /// Short videos reserved
    pub short_uploaded: u32,
}

impl DailyQuotaRecord {
    /// Empty record for a day that has not been touched yet
    pub fn empty(date: NaiveDate, quota_limit: u32) -> Self {
        Self {
            date,
            quota_used: 0,
            quota_limit,
            upload_count: 0,
            final_uploaded: 0,
            short_uploaded: 0,
        }
    }

    /// Reserved count for a content type
    pub fn uploaded(&self, video_type: VideoType) -> u32 {
        match video_type {
            VideoType::Final => self.final_uploaded,
            VideoType::Short => self.short_uploaded,
        }
    }
}

// ============================================================================
// Quota Status
// ============================================================================

/// Derived view of a day's remaining capacity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub date: NaiveDate,
    pub final_used: u32,
    pub final_limit: u32,
    pub final_remaining: u32,
    pub short_used: u32,
    pub short_limit: u32,
    pub short_remaining: u32,
    pub quota_used: u32,
    pub quota_limit: u32,
    pub quota_remaining: u32,
    pub quota_percentage: f64,
}

impl QuotaStatus {
    /// Compute status from a record and the configured limits
    pub fn from_record(record: &DailyQuotaRecord, final_limit: u32, short_limit: u32) -> Self {
        let quota_percentage = if record.quota_limit == 0 {
            0.0
        } else {
            f64::from(record.quota_used) / f64::from(record.quota_limit) * 100.0
        };

        Self {
            date: record.date,
            final_used: record.final_uploaded,
            final_limit,
            final_remaining: final_limit.saturating_sub(record.final_uploaded),
            short_used: record.short_uploaded,
            short_limit,
            short_remaining: short_limit.saturating_sub(record.short_uploaded),
            quota_used: record.quota_used,
            quota_limit: record.quota_limit,
            quota_remaining: record.quota_limit.saturating_sub(record.quota_used),
            quota_percentage,
        }
    }

    /// Remaining slots for a content type
    pub fn remaining(&self, video_type: VideoType) -> u32 {
        match video_type {
            VideoType::Final => self.final_remaining,
            VideoType::Short => self.short_remaining,
        }
    }

    /// Used slots for a content type
    pub fn used(&self, video_type: VideoType) -> u32 {
        match video_type {
            VideoType::Final => self.final_used,
            VideoType::Short => self.short_used,
        }
    }

    /// Daily cap for a content type
    pub fn limit(&self, video_type: VideoType) -> u32 {
        match video_type {
            VideoType::Final => self.final_limit,
            VideoType::Short => self.short_limit,
        }
    }
}

// ============================================================================
// Scheduled Upload
// ============================================================================

/// One scheduled artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledUpload {
    /// Surrogate id
    pub id: i64,

    /// Path of the finished video
    pub video_path: String,

    /// Content type
    pub video_type: VideoType,

    /// Resolved publish time
    pub scheduled_publish_time: DateTime<FixedOffset>,

    /// Lifecycle state
    pub upload_status: UploadStatus,

    /// Platform id once the publish action succeeded
    pub external_id: Option<String>,

    /// Failure or cancellation note
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display row for the calendar view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEntry {
    pub id: i64,
    pub video_path: String,
    pub video_type: VideoType,
    pub scheduled_time: DateTime<FixedOffset>,
    pub status: UploadStatus,
    pub external_id: Option<String>,
}

impl From<ScheduledUpload> for CalendarEntry {
    fn from(upload: ScheduledUpload) -> Self {
        Self {
            id: upload.id,
            video_path: upload.video_path,
            video_type: upload.video_type,
            scheduled_time: upload.scheduled_publish_time,
            status: upload.upload_status,
            external_id: upload.external_id,
        }
    }
}
