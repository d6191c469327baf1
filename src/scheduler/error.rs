//! Error types for the scheduler module

use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::ErrorCode;
use thiserror::Error;

use crate::models::VideoType;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, rejected before any I/O
    InvalidInput,
    /// A business rule refused the request; retrying the same request will not help
    Rejected,
    /// Lock timeout, unreachable store or platform; safe to retry later
    Infrastructure,
}

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Unknown content type
    #[error("Invalid video type '{value}'. Valid options: final, short")]
    InvalidVideoType { value: String },

    /// Unknown upload status
    #[error("Invalid upload status '{value}'")]
    InvalidStatus { value: String },

    /// Configuration value out of range
    #[error("Config error in '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Requested publish time is not in the future
    #[error("Requested publish time {requested} is not in the future")]
    PastPublishTime { requested: DateTime<FixedOffset> },

    /// Artifact already has a live schedule
    #[error("{video_path} is already scheduled for {scheduled_time}")]
    AlreadyScheduled {
        video_path: String,
        scheduled_time: DateTime<FixedOffset>,
    },

    /// Per-type daily cap reached
    #[error(
        "No remaining quota for {video_type} videos on {date}. Used: {used}/{limit} {video_type}-video slots"
    )]
    QuotaExhausted {
        video_type: VideoType,
        date: NaiveDate,
        used: u32,
        limit: u32,
    },

    /// Weighted API budget cannot cover another publish
    #[error(
        "Insufficient API quota on {date}: {remaining} units left, upload needs {cost}. Used: {used}/{limit}"
    )]
    BudgetExhausted {
        date: NaiveDate,
        used: u32,
        limit: u32,
        remaining: u32,
        cost: u32,
    },

    /// Requested slot is taken and the only alternative lies on another day
    #[error(
        "Requested time {requested} is already taken; next available slot is {alternative} on a different day"
    )]
    SlotConflict {
        requested: DateTime<FixedOffset>,
        alternative: DateTime<FixedOffset>,
    },

    /// Last-resort slot is already occupied
    #[error("No free publish slot available on {date}")]
    NoSlotAvailable { date: NaiveDate },

    /// Bounded lock wait expired
    #[error("Timed out waiting for schedule lock during '{operation}': {reason}")]
    LockTimeout { operation: String, reason: String },

    /// Backing store could not be opened or read from disk
    #[error("Schedule store unavailable during '{operation}': {reason}")]
    StoreUnavailable { operation: String, reason: String },

    /// Query or data failure on a reachable store
    #[error("Storage error during '{operation}': {reason}")]
    Storage { operation: String, reason: String },

    /// External platform failure
    #[error("Platform error during '{operation}': {reason}")]
    Platform { operation: String, reason: String },

    /// Degraded cache failure
    #[error("Cache error during '{operation}': {reason}")]
    Cache { operation: String, reason: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    /// IO error
    #[error("IO error during '{operation}': {reason}")]
    Io { operation: String, reason: String },
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::from_sqlite("sqlite", err)
    }
}

impl SchedulerError {
    /// Map a SQLite error
    ///
    /// Busy/locked becomes [`Self::LockTimeout`]; failures to open or read the
    /// file become [`Self::StoreUnavailable`]; everything else, including bad
    /// rows and constraint violations, stays [`Self::Storage`].
    pub fn from_sqlite(operation: impl Into<String>, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => Self::LockTimeout {
                operation: operation.into(),
                reason: err.to_string(),
            },
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::SystemIoFailure) => Self::StoreUnavailable {
                operation: operation.into(),
                reason: err.to_string(),
            },
            _ => Self::Storage {
                operation: operation.into(),
                reason: err.to_string(),
            },
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a store-unavailable error
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a platform error
    pub fn platform(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache error
    pub fn cache_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cache {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context
    pub fn io_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVideoType { .. }
            | Self::InvalidStatus { .. }
            | Self::InvalidConfig { .. } => ErrorKind::InvalidInput,
            Self::PastPublishTime { .. }
            | Self::AlreadyScheduled { .. }
            | Self::QuotaExhausted { .. }
            | Self::BudgetExhausted { .. }
            | Self::SlotConflict { .. }
            | Self::NoSlotAvailable { .. } => ErrorKind::Rejected,
            Self::LockTimeout { .. }
            | Self::StoreUnavailable { .. }
            | Self::Storage { .. }
            | Self::Platform { .. }
            | Self::Cache { .. }
            | Self::Serialization { .. }
            | Self::Io { .. } => ErrorKind::Infrastructure,
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    /// True when the primary store itself could not be reached
    ///
    /// Lock timeouts and query errors are excluded: the store answered.
    pub fn is_store_unreachable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhausted_message_names_limit() {
        let err = SchedulerError::QuotaExhausted {
            video_type: VideoType::Final,
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            used: 2,
            limit: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("No remaining quota for final videos"));
        assert!(msg.contains("Used: 2/2"));
        assert!(msg.contains("2025-01-01"));
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_budget_message_names_usage() {
        let err = SchedulerError::BudgetExhausted {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            used: 8401,
            limit: 10000,
            remaining: 1599,
            cost: 1600,
        };
        assert!(err.to_string().contains("8401/10000"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_kinds() {
        let invalid = SchedulerError::InvalidVideoType {
            value: "long".into(),
        };
        assert_eq!(invalid.kind(), ErrorKind::InvalidInput);

        let timeout = SchedulerError::LockTimeout {
            operation: "schedule".into(),
            reason: "database is locked".into(),
        };
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_store_unreachable());

        let unavailable = SchedulerError::unavailable("connect", "unable to open database file");
        assert!(unavailable.is_recoverable());
        assert!(unavailable.is_store_unreachable());

        let storage = SchedulerError::storage("check_locked", "quota row vanished");
        assert_eq!(storage.kind(), ErrorKind::Infrastructure);
        assert!(!storage.is_store_unreachable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let scheduler_err: SchedulerError = json_err.into();
        assert!(matches!(scheduler_err, SchedulerError::Serialization { .. }));
    }

    #[test]
    fn test_busy_maps_to_lock_timeout() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        let err = SchedulerError::from_sqlite("schedule", busy);
        assert!(matches!(err, SchedulerError::LockTimeout { .. }));
    }

    #[test]
    fn test_open_failures_map_to_unavailable() {
        let cant_open = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert!(SchedulerError::from_sqlite("connect", cant_open).is_store_unreachable());

        let bad_row = rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            "Invalid video type 'long'".into(),
        );
        let err = SchedulerError::from_sqlite("schedule", bad_row);
        assert!(matches!(err, SchedulerError::Storage { .. }));
        assert!(!err.is_store_unreachable());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("CHECK constraint failed".into()),
        );
        assert!(!SchedulerError::from_sqlite("reserve", constraint).is_store_unreachable());
    }
}
