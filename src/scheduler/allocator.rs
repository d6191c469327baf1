//! Publish slot allocation
//!
//! Pure algorithm: given a content type, a view of occupancy and remaining
//! quota, and the policy, find the earliest acceptable publish time.
//!
//! Days are tried in chronological order. Within a day, candidates follow the
//! configured order of `preferred_times` (an operator may rank 18:00 above
//! 10:00), then an hourly 09:00–21:00 sweep as fallback.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike};
use std::collections::HashSet;

use super::error::SchedulerResult;
use crate::config::ScheduleConfig;
use crate::models::VideoType;
use crate::utils::parse_hhmm;

/// First hour of the fallback sweep
pub const FALLBACK_FIRST_HOUR: u32 = 9;

/// Last hour of the fallback sweep (inclusive)
pub const FALLBACK_LAST_HOUR: u32 = 21;

/// Source of occupancy and remaining quota consulted by the allocator
pub trait SlotSource {
    /// Remaining publishes of `video_type` on `day`
    fn remaining(&self, day: NaiveDate, video_type: VideoType) -> SchedulerResult<u32>;

    /// Times of day already holding a publish on `day`, at minute precision
    fn occupied(&self, day: NaiveDate) -> SchedulerResult<HashSet<NaiveTime>>;
}

/// Parse "HH:MM" strings, skipping malformed entries with a warning
pub fn parse_preferred_times(raw: &[String]) -> Vec<NaiveTime> {
    raw.iter()
        .filter_map(|entry| {
            let time = parse_hhmm(entry);
            if time.is_none() {
                tracing::warn!(entry = %entry, "Skipping malformed HH:MM time");
            }
            time
        })
        .collect()
}

/// Truncate to minute precision
pub fn to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Combine a local date and time in `offset`
pub fn local_datetime(day: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = day.and_time(time) - Duration::seconds(i64::from(offset.local_minus_utc()));
    offset.from_utc_datetime(&utc)
}

/// Computes the earliest acceptable publish time
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    preferred_times: Vec<NaiveTime>,
    window_days: u32,
    offset: FixedOffset,
}

impl SlotAllocator {
    /// Build from policy; malformed preferred times are dropped here
    pub fn new(config: &ScheduleConfig, offset: FixedOffset) -> Self {
        let preferred_times = parse_preferred_times(&config.preferred_times);
        if preferred_times.is_empty() {
            tracing::warn!("No valid preferred times configured, hourly fallback only");
        }

        Self {
            preferred_times,
            window_days: config.window_days,
            offset,
        }
    }

    /// Valid preferred times in priority order
    pub fn preferred_times(&self) -> &[NaiveTime] {
        &self.preferred_times
    }

    /// Publishing timezone
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Earliest acceptable slot for `video_type`, scanning from
    /// `preferred_date` (or today) across the look-ahead window
    ///
    /// When nothing fits, returns [`Self::last_resort`] without re-checking
    /// quota; the caller must validate before committing.
    pub fn next_slot<S: SlotSource + ?Sized>(
        &self,
        source: &S,
        video_type: VideoType,
        preferred_date: Option<NaiveDate>,
        now: DateTime<FixedOffset>,
    ) -> SchedulerResult<DateTime<FixedOffset>> {
        let now = now.with_timezone(&self.offset);
        let today = now.date_naive();
        let start = preferred_date.map_or(today, |d| d.max(today));

        for offset in 0..i64::from(self.window_days) {
            let day = start + Duration::days(offset);

            if source.remaining(day, video_type)? == 0 {
                tracing::debug!(date = %day, video_type = %video_type, "Day full, skipping");
                continue;
            }

            let occupied = source.occupied(day)?;
            let cutoff = (day == today).then(|| now.time());

            if let Some(time) = self.first_free(&occupied, cutoff) {
                return Ok(local_datetime(day, time, self.offset));
            }
        }

        let fallback = self.last_resort(today);
        tracing::warn!(
            video_type = %video_type,
            fallback = %fallback,
            window_days = self.window_days,
            "No slot found in window, using last-resort time"
        );
        Ok(fallback)
    }

    /// Fixed slot past the window: first preferred time (or 10:00)
    pub fn last_resort(&self, today: NaiveDate) -> DateTime<FixedOffset> {
        let time = self
            .preferred_times
            .first()
            .copied()
            .unwrap_or_else(|| NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN));
        local_datetime(
            today + Duration::days(i64::from(self.window_days)),
            time,
            self.offset,
        )
    }

    /// First candidate not occupied and strictly after `cutoff`
    fn first_free(&self, occupied: &HashSet<NaiveTime>, cutoff: Option<NaiveTime>) -> Option<NaiveTime> {
        let usable = |time: &NaiveTime| {
            !occupied.contains(time) && cutoff.map_or(true, |c| *time > c)
        };

        if let Some(time) = self.preferred_times.iter().copied().find(|t| usable(t)) {
            return Some(time);
        }

        (FALLBACK_FIRST_HOUR..=FALLBACK_LAST_HOUR)
            .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
            .find(|t| usable(t))
    }
}
