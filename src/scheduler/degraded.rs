//! Degraded-mode scheduling
//!
//! Used when the primary store is unreachable. Occupancy is sourced from the
//! platform's own listing, bucketed into fixed times of day and cached on
//! disk as `{ "YYYY-MM-DD": { "HH:MM": count } }`. There is no per-type
//! breakdown since the listing cannot attribute type.
//!
//! Guarantees hold within one process only. Two processes running degraded
//! at the same time can both book the same bucket.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::allocator::{local_datetime, parse_preferred_times};
use super::error::{SchedulerError, SchedulerResult};
use super::platform::PlatformListing;
use crate::config::DegradedConfig;
use crate::utils::retry::{with_retry, RetryConfig};

const BUCKET_FORMAT: &str = "%H:%M";

// ============================================================================
// Occupancy Map
// ============================================================================

/// `date → bucket → count`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyMap {
    days: BTreeMap<NaiveDate, BTreeMap<NaiveTime, u32>>,
}

impl OccupancyMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Count in one bucket
    pub fn count(&self, date: NaiveDate, bucket: NaiveTime) -> u32 {
        self.days
            .get(&date)
            .and_then(|day| day.get(&bucket))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over every bucket of a day
    pub fn day_total(&self, date: NaiveDate) -> u32 {
        self.days.get(&date).map_or(0, |day| day.values().sum())
    }

    /// Buckets of a day with their counts
    pub fn day(&self, date: NaiveDate) -> BTreeMap<NaiveTime, u32> {
        self.days.get(&date).cloned().unwrap_or_default()
    }

    /// Add one publish to a bucket
    pub fn increment(&mut self, date: NaiveDate, bucket: NaiveTime) {
        *self.days.entry(date).or_default().entry(bucket).or_insert(0) += 1;
    }

    /// Days with at least one entry
    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.days.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Serialize to the cache file layout
    pub fn to_json(&self) -> SchedulerResult<String> {
        let raw: BTreeMap<String, BTreeMap<String, u32>> = self
            .days
            .iter()
            .map(|(date, buckets)| {
                let buckets = buckets
                    .iter()
                    .map(|(time, count)| (time.format(BUCKET_FORMAT).to_string(), *count))
                    .collect();
                (date.to_string(), buckets)
            })
            .collect();

        Ok(serde_json::to_string_pretty(&raw)?)
    }

    /// Parse the cache file layout
    ///
    /// Malformed keys are skipped; a document that is not the expected shape
    /// is an error.
    pub fn from_json(json: &str) -> SchedulerResult<Self> {
        let raw: BTreeMap<String, BTreeMap<String, u32>> = serde_json::from_str(json)?;
        let mut map = Self::new();

        for (date, buckets) in raw {
            let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
                tracing::warn!(key = %date, "Skipping malformed date in degraded cache");
                continue;
            };
            for (time, count) in buckets {
                match NaiveTime::parse_from_str(&time, BUCKET_FORMAT) {
                    Ok(time) if count > 0 => {
                        map.days.entry(date).or_default().insert(time, count);
                    }
                    Ok(_) => {}
                    Err(_) => {
                        tracing::warn!(date = %date, key = %time, "Skipping malformed bucket in degraded cache")
                    }
                }
            }
        }

        Ok(map)
    }

    async fn save_to_file(&self, path: &Path) -> SchedulerResult<()> {
        let json = self.to_json()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SchedulerError::io_error("save_degraded_cache", e.to_string()))?;
            }
        }

        // write-then-rename so a crash never leaves a half-written cache
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SchedulerError::io_error("save_degraded_cache", e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SchedulerError::io_error("save_degraded_cache", e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// Degraded Scheduler
// ============================================================================

/// Bucket-based slot assignment from a platform-derived snapshot
pub struct DegradedScheduler {
    occupancy: RwLock<OccupancyMap>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    cache_path: Option<PathBuf>,
    listing: Arc<dyn PlatformListing>,
    retry: RetryConfig,
    buckets: Vec<NaiveTime>,
    daily_max_total: u32,
    slot_capacity: u32,
    window_days: u32,
    fallback_days: u32,
    offset: FixedOffset,
}

impl DegradedScheduler {
    /// Create a scheduler with an empty map; call [`Self::load_cache`] or
    /// [`Self::refresh`] to populate it
    pub fn new(
        config: &DegradedConfig,
        offset: FixedOffset,
        listing: Arc<dyn PlatformListing>,
    ) -> SchedulerResult<Self> {
        let mut buckets = parse_preferred_times(&config.bucket_times);
        buckets.sort();
        buckets.dedup();

        if buckets.is_empty() {
            return Err(SchedulerError::invalid_config(
                "degraded.bucket_times",
                "at least one valid HH:MM bucket is required",
            ));
        }

        Ok(Self {
            occupancy: RwLock::new(OccupancyMap::new()),
            last_refresh: RwLock::new(None),
            cache_path: Some(config.cache_path.clone()),
            listing,
            retry: RetryConfig::default(),
            buckets,
            daily_max_total: config.daily_max_total,
            slot_capacity: config.slot_capacity,
            window_days: config.window_days,
            fallback_days: config.fallback_days,
            offset,
        })
    }

    /// Keep the map in memory only
    pub fn without_cache_file(mut self) -> Self {
        self.cache_path = None;
        self
    }

    /// Override the platform retry policy
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fixed buckets, ascending
    pub fn buckets(&self) -> &[NaiveTime] {
        &self.buckets
    }

    /// Cache file location, if persisted
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// When the map was last rebuilt from the platform
    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }

    /// Copy of the current map
    pub async fn snapshot(&self) -> OccupancyMap {
        self.occupancy.read().await.clone()
    }

    /// Bucket counts for one day
    pub async fn occupancy(&self, date: NaiveDate) -> BTreeMap<NaiveTime, u32> {
        self.occupancy.read().await.day(date)
    }

    /// Restore the map from the cache file
    ///
    /// A missing file leaves the map empty; a corrupt file is logged and
    /// ignored. Returns whether a cache was loaded.
    pub async fn load_cache(&self) -> bool {
        let Some(ref path) = self.cache_path else {
            return false;
        };

        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No degraded cache file yet");
                return false;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read degraded cache");
                return false;
            }
        };

        match OccupancyMap::from_json(&json) {
            Ok(map) => {
                tracing::info!(
                    path = %path.display(),
                    days = map.dates().count(),
                    "Degraded cache loaded"
                );
                *self.occupancy.write().await = map;
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt degraded cache");
                false
            }
        }
    }

    /// Rebuild the map from the platform listing
    ///
    /// Replaces the map rather than merging. Items at or before `now` are
    /// ignored. Returns the number of items counted.
    pub async fn refresh(&self, now: DateTime<FixedOffset>) -> SchedulerResult<usize> {
        let listing = Arc::clone(&self.listing);
        let times = with_retry(&self.retry, || listing.scheduled_publish_times()).await?;

        let mut map = OccupancyMap::new();
        let mut counted = 0;
        for time in times.into_iter().filter(|t| *t > now) {
            let local = time.with_timezone(&self.offset);
            map.increment(local.date_naive(), self.bucket_of(local.time()));
            counted += 1;
        }

        {
            let mut occupancy = self.occupancy.write().await;
            *occupancy = map;
            self.persist(&occupancy).await;
        }
        *self.last_refresh.write().await = Some(Utc::now());

        tracing::info!(items = counted, "Degraded occupancy refreshed from platform");
        Ok(counted)
    }

    /// Earliest bucket with room, without recording it
    pub async fn next_slot(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let occupancy = self.occupancy.read().await;
        self.pick(&occupancy, now)
    }

    /// Count a locally assigned publish and persist immediately
    ///
    /// Lets a batch of calls stay consistent without re-querying the platform.
    pub async fn record_local(&self, publish_at: DateTime<FixedOffset>) {
        let mut occupancy = self.occupancy.write().await;
        self.count_local(&mut occupancy, publish_at);
        self.persist(&occupancy).await;
    }

    /// Pick the next bucket and record it under one lock
    pub async fn claim_next(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let mut occupancy = self.occupancy.write().await;
        let slot = self.pick(&occupancy, now);
        self.count_local(&mut occupancy, slot);
        self.persist(&occupancy).await;
        slot
    }

    /// Record `publish_at` if its day and bucket still have room
    ///
    /// A time earlier than the first bucket of its day belongs to no bucket
    /// and is refused.
    pub async fn claim_at(&self, publish_at: DateTime<FixedOffset>) -> bool {
        let local = publish_at.with_timezone(&self.offset);
        let day = local.date_naive();
        let Some(bucket) = self.containing_bucket(local.time()) else {
            return false;
        };

        let mut occupancy = self.occupancy.write().await;
        if occupancy.day_total(day) >= self.daily_max_total
            || occupancy.count(day, bucket) >= self.slot_capacity
        {
            return false;
        }

        self.count_local(&mut occupancy, publish_at);
        self.persist(&occupancy).await;
        true
    }

    /// Claim the earliest bucket with room on `day` only, never another day
    pub async fn claim_on_day(
        &self,
        day: NaiveDate,
        now: DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        let now = now.with_timezone(&self.offset);

        let mut occupancy = self.occupancy.write().await;
        if occupancy.day_total(day) >= self.daily_max_total {
            return None;
        }

        let slot = self
            .buckets
            .iter()
            .copied()
            .filter(|bucket| occupancy.count(day, *bucket) < self.slot_capacity)
            .map(|bucket| local_datetime(day, bucket, self.offset))
            .find(|slot| *slot > now)?;

        self.count_local(&mut occupancy, slot);
        self.persist(&occupancy).await;
        Some(slot)
    }

    fn pick(&self, occupancy: &OccupancyMap, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let now = now.with_timezone(&self.offset);
        let today = now.date_naive();

        for offset in 0..i64::from(self.window_days) {
            let day = today + Duration::days(offset);

            if occupancy.day_total(day) >= self.daily_max_total {
                continue;
            }

            let free = self.buckets.iter().copied().find(|bucket| {
                occupancy.count(day, *bucket) < self.slot_capacity
                    && (offset > 0 || *bucket > now.time())
            });

            if let Some(bucket) = free {
                return local_datetime(day, bucket, self.offset);
            }
        }

        let fallback = local_datetime(
            today + Duration::days(i64::from(self.fallback_days)),
            self.buckets[0],
            self.offset,
        );
        tracing::warn!(fallback = %fallback, "No degraded bucket free in window, using fallback");
        fallback
    }

    fn count_local(&self, occupancy: &mut OccupancyMap, publish_at: DateTime<FixedOffset>) {
        let local = publish_at.with_timezone(&self.offset);
        let bucket = self.bucket_of(local.time());
        occupancy.increment(local.date_naive(), bucket);
        tracing::debug!(
            date = %local.date_naive(),
            bucket = %bucket.format(BUCKET_FORMAT),
            count = occupancy.count(local.date_naive(), bucket),
            "Recorded local degraded assignment"
        );
    }

    /// Latest bucket start at or before `time`
    fn containing_bucket(&self, time: NaiveTime) -> Option<NaiveTime> {
        self.buckets.iter().copied().rev().find(|bucket| *bucket <= time)
    }

    /// Bucket a listed or recorded time counts against; times before the
    /// first bucket count against it
    fn bucket_of(&self, time: NaiveTime) -> NaiveTime {
        self.containing_bucket(time).unwrap_or(self.buckets[0])
    }

    async fn persist(&self, occupancy: &OccupancyMap) {
        let Some(ref path) = self.cache_path else {
            return;
        };
        if let Err(e) = occupancy.save_to_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist degraded cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedListing(Vec<DateTime<FixedOffset>>);

    #[async_trait]
    impl PlatformListing for FixedListing {
        async fn scheduled_publish_times(&self) -> SchedulerResult<Vec<DateTime<FixedOffset>>> {
            Ok(self.0.clone())
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        local_datetime(date(d), hm(h, m), utc())
    }

    fn scheduler(listing: Vec<DateTime<FixedOffset>>) -> DegradedScheduler {
        DegradedScheduler::new(&DegradedConfig::default(), utc(), Arc::new(FixedListing(listing)))
            .unwrap()
            .without_cache_file()
            .with_retry_config(RetryConfig::with_delays(0, 1, 1))
    }

    #[test]
    fn test_occupancy_json_layout() {
        let mut map = OccupancyMap::new();
        map.increment(date(10), hm(6, 0));
        map.increment(date(10), hm(6, 0));
        map.increment(date(11), hm(18, 0));

        let json = map.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["2025-03-10"]["06:00"], 2);
        assert_eq!(value["2025-03-11"]["18:00"], 1);

        assert_eq!(OccupancyMap::from_json(&json).unwrap(), map);
    }

    #[test]
    fn test_from_json_skips_malformed_keys() {
        let map = OccupancyMap::from_json(r#"{"2025-03-10": {"6am": 1, "12:00": 2}, "soon": {"00:00": 1}}"#)
            .unwrap();
        assert_eq!(map.count(date(10), hm(12, 0)), 2);
        assert_eq!(map.day_total(date(10)), 2);
        assert_eq!(map.dates().count(), 1);
    }

    #[tokio::test]
    async fn test_next_slot_skips_past_buckets_today() {
        let degraded = scheduler(vec![]);
        assert_eq!(degraded.next_slot(at(10, 7, 0)).await, at(10, 12, 0));
        assert_eq!(degraded.next_slot(at(10, 18, 0)).await, at(11, 0, 0));
    }

    #[tokio::test]
    async fn test_record_local_then_next_slot() {
        let degraded = scheduler(vec![]);
        let now = at(10, 7, 0);

        let first = degraded.next_slot(now).await;
        degraded.record_local(first).await;
        let second = degraded.next_slot(now).await;

        assert_ne!(first, second);
        assert_eq!(second, at(10, 18, 0));
    }

    #[tokio::test]
    async fn test_claim_at_respects_capacity() {
        let degraded = scheduler(vec![]);
        assert!(degraded.claim_at(at(10, 13, 0)).await);
        // same 12:00 bucket
        assert!(!degraded.claim_at(at(10, 15, 45)).await);
        assert_eq!(degraded.claim_next(at(10, 7, 0)).await, at(10, 18, 0));
    }

    #[tokio::test]
    async fn test_claim_at_before_first_bucket_refused() {
        let mut config = DegradedConfig::default();
        config.bucket_times = vec!["06:00".into(), "18:00".into()];
        let degraded = DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![])))
            .unwrap()
            .without_cache_file();

        assert!(!degraded.claim_at(at(10, 3, 0)).await);
        assert!(degraded.occupancy(date(10)).await.is_empty());
        assert!(degraded.claim_at(at(10, 6, 30)).await);
    }

    #[tokio::test]
    async fn test_claim_on_day_stays_on_day() {
        let degraded = scheduler(vec![]);
        let now = at(9, 20, 0);

        assert_eq!(degraded.claim_on_day(date(10), now).await, Some(at(10, 0, 0)));
        assert!(degraded.claim_at(at(10, 12, 0)).await);
        assert_eq!(degraded.claim_on_day(date(10), now).await, Some(at(10, 6, 0)));
        assert_eq!(degraded.claim_on_day(date(10), now).await, Some(at(10, 18, 0)));

        // day full; nothing is claimed elsewhere
        assert_eq!(degraded.claim_on_day(date(10), now).await, None);
        assert!(degraded.occupancy(date(11)).await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_on_day_skips_past_buckets() {
        let degraded = scheduler(vec![]);
        assert_eq!(degraded.claim_on_day(date(10), at(10, 13, 0)).await, Some(at(10, 18, 0)));
        assert_eq!(degraded.claim_on_day(date(10), at(10, 19, 0)).await, None);
    }

    #[tokio::test]
    async fn test_daily_max_total_skips_day() {
        let mut config = DegradedConfig::default();
        config.daily_max_total = 1;
        let degraded = DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![])))
            .unwrap()
            .without_cache_file();

        degraded.record_local(at(10, 12, 0)).await;
        assert_eq!(degraded.next_slot(at(10, 7, 0)).await, at(11, 0, 0));
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_ignores_past() {
        let degraded = scheduler(vec![at(10, 5, 0), at(10, 13, 30), at(10, 14, 0)]);
        degraded.record_local(at(12, 6, 0)).await;

        let counted = degraded.refresh(at(10, 7, 0)).await.unwrap();
        assert_eq!(counted, 2);

        assert_eq!(degraded.occupancy(date(10)).await.get(&hm(12, 0)), Some(&2));
        assert!(degraded.occupancy(date(12)).await.is_empty());
        assert!(degraded.last_refresh().await.is_some());
    }

    #[tokio::test]
    async fn test_fallback_when_window_full() {
        let mut config = DegradedConfig::default();
        config.daily_max_total = 0;
        let degraded = DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![])))
            .unwrap()
            .without_cache_file();

        assert_eq!(degraded.next_slot(at(10, 7, 0)).await, at(17, 0, 0));
    }

    #[tokio::test]
    async fn test_cache_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = DegradedConfig::default();
        config.cache_path = dir.path().join("cache/degraded.json");

        let degraded =
            DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![]))).unwrap();
        degraded.record_local(at(10, 12, 5)).await;
        assert!(config.cache_path.exists());

        let restored =
            DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![]))).unwrap();
        assert!(restored.load_cache().await);
        assert_eq!(restored.occupancy(date(10)).await.get(&hm(12, 0)), Some(&1));
    }

    #[tokio::test]
    async fn test_corrupt_cache_ignored() {
        let dir = TempDir::new().unwrap();
        let mut config = DegradedConfig::default();
        config.cache_path = dir.path().join("degraded.json");
        std::fs::write(&config.cache_path, "{not json").unwrap();

        let degraded =
            DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![]))).unwrap();
        assert!(!degraded.load_cache().await);
        assert!(degraded.snapshot().await.is_empty());
    }

    #[test]
    fn test_no_valid_buckets_rejected() {
        let mut config = DegradedConfig::default();
        config.bucket_times = vec!["late".into()];
        let result = DegradedScheduler::new(&config, utc(), Arc::new(FixedListing(vec![])));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig { .. })));
    }
}
