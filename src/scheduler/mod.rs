//! Admission-controlled publish scheduling
//!
//! Assigns each finished video a future publish time while respecting a
//! per-day, per-type publish cap, a shared weighted API budget, and
//! collision-free slots, under concurrent callers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PublishScheduler                        │
//! │                                                              │
//! │   ┌────────────────────────────┐    ┌────────────────────┐   │
//! │   │       ScheduleStore        │    │ DegradedScheduler  │   │
//! │   │  ┌──────────┐ ┌─────────┐  │    │  (platform-derived │   │
//! │   │  │  Quota   │ │  Slot   │  │    │   occupancy cache) │   │
//! │   │  │  Ledger  │ │Allocator│  │    └─────────┬──────────┘   │
//! │   │  └────┬─────┘ └─────────┘  │              │              │
//! │   └───────┼────────────────────┘              │              │
//! └───────────┼───────────────────────────────────┼──────────────┘
//!             ▼                                   ▼
//!        ┌─────────┐                      ┌───────────────┐
//!        │ SQLite  │                      │ Platform API  │
//!        └─────────┘                      └───────────────┘
//! ```
//!
//! # Modules
//!
//! - [`quota`] - Per-day usage counters and the locked reservation guard
//! - [`allocator`] - Earliest-acceptable-slot search
//! - [`store`] - Schedule records and the locked admission sequence
//! - [`degraded`] - Bucket-based fallback when the store is unreachable
//! - [`platform`] - Listing of publishes already booked on the platform
//! - [`failover`] - Switching between the two paths
//!
//! # Admission sequence
//!
//! 1. Reject a requested time that is not in the future
//! 2. Take the write lock (bounded wait)
//! 3. Reject a path that already has a live schedule
//! 4. Resolve a collision once, same day only, or allocate a slot
//! 5. Check the day's caps and budget, reserve, insert, commit
//!
//! A failure at any step after the lock rolls back the whole transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use clipcast::prelude::*;
//!
//! let config = AppConfig::from_env()?;
//! let db = Database::open(&config.database)?;
//! let store = ScheduleStore::new(db, &config.schedule)?;
//!
//! let scheduled = store.schedule("out/lesson-01.mp4", VideoType::Final, None)?;
//! println!("{}", scheduled.message);
//!
//! store.mark_uploading("out/lesson-01.mp4")?;
//! store.update_with_external_id("out/lesson-01.mp4", Some("abc123"), UploadStatus::Completed)?;
//! ```

pub mod allocator;
pub mod degraded;
pub mod error;
pub mod failover;
pub mod platform;
pub mod quota;
pub mod store;

// Re-export main types
pub use allocator::{SlotAllocator, SlotSource};
pub use degraded::{DegradedScheduler, OccupancyMap};
pub use error::{ErrorKind, SchedulerError, SchedulerResult};
pub use failover::{HealthRecord, PublishScheduler, StoreHealth};
pub use platform::{HttpPlatformListing, PlatformListing};
pub use quota::{LockedDay, QuotaLedger};
pub use store::{ScheduleReport, ScheduleStore, Scheduled};
