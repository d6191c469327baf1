//! clipcast - Publish scheduler for generated video clips
//!
//! Assigns finished videos a future publish time under per-day caps, a
//! weighted API budget and collision-free slots, with a degraded mode that
//! keeps scheduling when the primary store is down.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`storage`] - SQLite database handle and schema
//! - [`scheduler`] - Quota ledger, slot allocation, schedule store, degraded mode
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use clipcast::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let db = Database::open(&config.database)?;
//!     let store = ScheduleStore::new(db, &config.schedule)?;
//!     let scheduled = store.schedule("out/lesson-01.mp4", VideoType::Short, None)?;
//!     println!("{}", scheduled.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::{Error, Result};
    pub use crate::models::{CalendarEntry, QuotaStatus, ScheduledUpload, UploadStatus, VideoType};
    pub use crate::scheduler::{
        DegradedScheduler, PublishScheduler, QuotaLedger, ScheduleReport, ScheduleStore,
        Scheduled, SchedulerError, SchedulerResult,
    };
    pub use crate::storage::Database;
}

// Direct re-exports for convenience
pub use models::{UploadStatus, VideoType};
