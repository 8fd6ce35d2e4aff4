// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Staleness, throttling and retention settings.

use std::time::{Duration, Instant};

/// Default time after which a cached value is considered stale.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

/// Default minimum time between two fetch starts for the same key.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1500);

/// Default upper bound on the number of entries kept by a cache.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Controls when cached values are revalidated.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use freshet::RefreshPolicy;
///
/// let policy = RefreshPolicy::default().with_max_age(Duration::from_secs(60));
/// assert_eq!(policy.max_age, Duration::from_secs(60));
/// assert_eq!(policy.min_refresh_interval, Duration::from_millis(1500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RefreshPolicy {
    /// How long a fetched value is served without triggering a background
    /// revalidation.
    pub max_age: Duration,

    /// Window after a fetch start during which manual refreshes reuse the
    /// in-flight request or the cached value instead of starting another one.
    pub min_refresh_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

impl RefreshPolicy {
    /// Returns a copy with the given maximum age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Returns a copy with the given minimum refresh interval.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub(crate) fn is_stale(max_age: Duration, fetched_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(fetched_at) >= max_age
    }

    pub(crate) fn is_throttled(&self, last_started: Option<Instant>, now: Instant) -> bool {
        last_started.is_some_and(|started| now.saturating_duration_since(started) < self.min_refresh_interval)
    }
}

/// Bounds the number of entries a cache keeps.
///
/// Entries are only evicted while nobody is subscribed to them and no
/// request is in flight. When the cache is full, the entry that has been
/// unobserved the longest goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetentionPolicy {
    /// Maximum number of entries before unobserved entries are evicted.
    pub max_entries: usize,

    /// Unobserved entries older than this are dropped by
    /// [`FetchCache::purge_idle`](crate::FetchCache::purge_idle).
    /// `None` keeps them until the cache is full.
    pub idle_timeout: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            idle_timeout: None,
        }
    }
}

impl RetentionPolicy {
    /// Returns a copy with the given entry limit.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Returns a copy that drops entries unobserved for longer than
    /// `idle_timeout`.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

/// Per-call overrides for [`FetchCache::get_with`](crate::FetchCache::get_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    max_age: Option<Duration>,
}

impl FetchOptions {
    /// Creates options that use the cache's defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the cache's maximum age for this call.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub(crate) fn effective_max_age(&self, policy: &RefreshPolicy) -> Duration {
        self.max_age.unwrap_or(policy.max_age)
    }
}
