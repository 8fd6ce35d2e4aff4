// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for [`FetchCache`].

use std::{
    fmt::{self, Debug},
    marker::PhantomData,
    time::Duration,
};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::Meter;

use crate::{Clock, FetchCache, RefreshPolicy, RetentionPolicy, Spawner, telemetry::Telemetry};

const DEFAULT_NAME: &str = "freshet";

/// Builder for constructing a [`FetchCache`].
///
/// Created by calling [`FetchCache::builder`]. Every setting has a default, so
/// `FetchCache::builder::<T>(clock).build()` is a working cache.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use freshet::{Clock, FetchCache, RefreshPolicy, RetentionPolicy};
///
/// let cache = FetchCache::builder::<Vec<String>>(Clock::new_system())
///     .name("campaigns")
///     .refresh_policy(RefreshPolicy::default().with_max_age(Duration::from_secs(10)))
///     .retention_policy(RetentionPolicy::default().with_idle_timeout(Duration::from_secs(300)))
///     .build();
///
/// assert_eq!(cache.refresh_policy().max_age, Duration::from_secs(10));
/// ```
#[must_use]
pub struct FetchCacheBuilder<T> {
    name: &'static str,
    clock: Clock,
    spawner: Spawner,
    refresh: RefreshPolicy,
    retention: RetentionPolicy,
    logs: bool,
    #[cfg(feature = "metrics")]
    meter: Option<Meter>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> FetchCacheBuilder<T> {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            name: DEFAULT_NAME,
            clock,
            spawner: Spawner::default(),
            refresh: RefreshPolicy::default(),
            retention: RetentionPolicy::default(),
            logs: cfg!(feature = "logs"),
            #[cfg(feature = "metrics")]
            meter: None,
            _phantom: PhantomData,
        }
    }

    /// Sets the name identifying this cache in logs and metrics.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Replaces the whole refresh policy, for example one loaded from
    /// configuration.
    pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = policy;
        self
    }

    /// Sets the age at which a cached value becomes stale.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.refresh.max_age = max_age;
        self
    }

    /// Sets the minimum time between the starts of two requests for one key.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh.min_refresh_interval = interval;
        self
    }

    /// Replaces the whole retention policy.
    pub fn retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Sets how many entries the cache holds before evicting unobserved ones.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.retention.max_entries = max_entries;
        self
    }

    /// Sets how long an unobserved entry is kept before
    /// [`FetchCache::purge_idle`] removes it.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.retention.idle_timeout = Some(idle_timeout);
        self
    }

    /// Sets the spawner that drives requests in the background.
    ///
    /// Defaults to [`Spawner::new_tokio`].
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = spawner;
        self
    }

    /// Enables or disables `tracing` events for cache activity.
    ///
    /// Enabled by default when the `logs` feature is on.
    pub fn enable_logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Reports cache metrics through the given OpenTelemetry meter.
    #[cfg(feature = "metrics")]
    pub fn meter(mut self, meter: &Meter) -> Self {
        self.meter = Some(meter.clone());
        self
    }

    /// Builds the cache.
    pub fn build(self) -> FetchCache<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let telemetry = Telemetry::new(self.logs);
        #[cfg(feature = "metrics")]
        let telemetry = match &self.meter {
            Some(meter) => telemetry.with_meter(meter),
            None => telemetry,
        };

        FetchCache::new(self.name, self.clock, self.spawner, self.refresh, self.retention, telemetry)
    }
}

impl<T> Debug for FetchCacheBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCacheBuilder")
            .field("name", &self.name)
            .field("clock", &self.clock)
            .field("spawner", &self.spawner)
            .field("refresh", &self.refresh)
            .field("retention", &self.retention)
            .field("logs", &self.logs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES, DEFAULT_MIN_REFRESH_INTERVAL};

    #[test]
    fn defaults() {
        let cache = FetchCache::builder::<u8>(Clock::new_system()).build();
        assert_eq!(cache.name(), DEFAULT_NAME);
        assert_eq!(cache.refresh_policy().max_age, DEFAULT_MAX_AGE);
        assert_eq!(cache.refresh_policy().min_refresh_interval, DEFAULT_MIN_REFRESH_INTERVAL);
        assert_eq!(cache.retention_policy().max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(cache.retention_policy().idle_timeout, None);
    }

    #[test]
    fn individual_settings_override_policies() {
        let cache = FetchCache::builder::<u8>(Clock::new_system())
            .refresh_policy(RefreshPolicy::default().with_max_age(Duration::from_secs(1)))
            .min_refresh_interval(Duration::ZERO)
            .retention_policy(RetentionPolicy::default())
            .max_entries(8)
            .idle_timeout(Duration::from_secs(60))
            .build();

        assert_eq!(cache.refresh_policy().max_age, Duration::from_secs(1));
        assert_eq!(cache.refresh_policy().min_refresh_interval, Duration::ZERO);
        assert_eq!(cache.retention_policy().max_entries, 8);
        assert_eq!(cache.retention_policy().idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn debug_does_not_require_debug_payload() {
        struct Opaque;
        let builder = FetchCacheBuilder::<Opaque>::new(Clock::new_system()).name("opaque");
        assert!(format!("{builder:?}").contains("opaque"));
    }
}
