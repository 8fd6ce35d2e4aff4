// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and metrics for fetch cache activity.
//!
//! With the `logs` feature every recorded event becomes a `tracing` event
//! carrying the cache name, key, operation and activity. With the `metrics`
//! feature events are also counted through OpenTelemetry, settled fetches are
//! timed and the entry count is reported as a gauge.

use std::time::Duration;

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter},
};

use crate::ResourceKey;

pub(crate) mod attributes;
#[cfg(feature = "metrics")]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// Name identifying a cache instance in logs and metrics.
pub type CacheName = &'static str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    ForceRefresh,
    Invalidate,
    Mutate,
    Evict,
}

impl CacheOperation {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::ForceRefresh => "cache.force_refresh",
            Self::Invalidate => "cache.invalidate",
            Self::Mutate => "cache.mutate",
            Self::Evict => "cache.evict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    /// Fresh value served without fetching.
    Hit,
    /// Stale value served while a revalidation starts.
    Stale,
    /// No value; a fetch starts.
    Miss,
    /// Attached to a request already in flight.
    Joined,
    /// Refresh suppressed by the minimum refresh interval.
    Throttled,
    Fetched,
    Failed,
    /// Result discarded because a newer request started.
    Superseded,
    RolledBack,
    Invalidated,
    Evicted,
}

impl CacheActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Stale => "cache.stale",
            Self::Miss => "cache.miss",
            Self::Joined => "cache.joined",
            Self::Throttled => "cache.throttled",
            Self::Fetched => "cache.fetched",
            Self::Failed => "cache.failed",
            Self::Superseded => "cache.superseded",
            Self::RolledBack => "cache.rolled_back",
            Self::Invalidated => "cache.invalidated",
            Self::Evicted => "cache.evicted",
        }
    }

    pub(crate) fn level(self) -> Level {
        match self {
            Self::Hit | Self::Joined | Self::Throttled | Self::Fetched | Self::Superseded => Level::Debug,
            Self::Stale | Self::Miss | Self::Invalidated | Self::Evicted => Level::Info,
            Self::Failed | Self::RolledBack => Level::Warn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Debug,
    Info,
    Warn,
}

#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
struct Metrics {
    events: Counter<u64>,
    fetch_duration: Histogram<f64>,
    entries: Gauge<u64>,
}

/// Records cache events to the enabled sinks.
#[derive(Debug, Clone, Default)]
pub(crate) struct Telemetry {
    logs: bool,
    #[cfg(feature = "metrics")]
    metrics: Option<Metrics>,
}

impl Telemetry {
    pub(crate) fn new(logs: bool) -> Self {
        Self {
            logs,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn with_meter(mut self, meter: &Meter) -> Self {
        self.metrics = Some(Metrics {
            events: metrics::create_event_counter(meter),
            fetch_duration: metrics::create_fetch_duration_histogram(meter),
            entries: metrics::create_entries_gauge(meter),
        });
        self
    }

    pub(crate) fn record(
        &self,
        name: CacheName,
        key: &ResourceKey,
        operation: CacheOperation,
        activity: CacheActivity,
        duration: Option<Duration>,
    ) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            let attrs = [
                KeyValue::new(attributes::CACHE_NAME, name),
                KeyValue::new(attributes::CACHE_RESOURCE, key.resource().to_owned()),
                KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
            ];
            metrics.events.add(1, &attrs);
            if let Some(duration) = duration {
                metrics.fetch_duration.record(duration.as_secs_f64(), &attrs);
            }
        }

        if self.logs {
            Self::emit(name, key, operation, activity, duration);
        }
    }

    #[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "no-op without the metrics feature"))]
    pub(crate) fn record_entries(&self, name: CacheName, entries: usize) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics
                .entries
                .record(u64::try_from(entries).unwrap_or(u64::MAX), &[KeyValue::new(attributes::CACHE_NAME, name)]);
        }
    }

    #[cfg(feature = "logs")]
    fn emit(name: CacheName, key: &ResourceKey, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Field names must match the constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = name,
                    cache.key = %key,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                )
            };
        }

        match activity.level() {
            Level::Debug => emit_event!(debug),
            Level::Info => emit_event!(info),
            Level::Warn => emit_event!(warn),
        }
    }

    #[cfg(not(feature = "logs"))]
    fn emit(_: CacheName, _: &ResourceKey, _: CacheOperation, _: CacheActivity, _: Option<Duration>) {}
}
