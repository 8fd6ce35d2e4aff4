// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time source for staleness, throttling and retention decisions.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Provides the current monotonic time to a [`FetchCache`](crate::FetchCache).
///
/// Every freshness decision the cache makes (is an entry stale, has the
/// refresh interval elapsed, how long has an entry been unobserved) reads the
/// time through the clock it was built with. This keeps the cache
/// deterministic under test.
///
/// Three flavors exist:
///
/// - [`Clock::new_system`] reads [`Instant::now`].
/// - [`Clock::new_tokio`] reads [`tokio::time::Instant::now`], so a test that
///   runs with a paused Tokio clock moves the cache's notion of time together
///   with `tokio::time::sleep` and `tokio::time::advance`.
/// - [`ClockControl::to_clock`] returns a clock that only moves when the
///   owning [`ClockControl`] is advanced.
///
/// Cloning a clock is cheap and every clone observes the same time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use freshet::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let start = clock.instant();
/// control.advance(Duration::from_secs(5));
/// assert_eq!(clock.instant() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct Clock(ClockKind);

#[derive(Debug, Clone)]
enum ClockKind {
    System,
    Tokio,
    Controlled(ClockControl),
}

impl Clock {
    /// Creates a clock backed by the operating system's monotonic clock.
    #[must_use]
    pub fn new_system() -> Self {
        Self(ClockKind::System)
    }

    /// Creates a clock backed by Tokio's time source.
    ///
    /// Unlike [`Clock::new_system`], this clock honors `tokio::time::pause`
    /// and `tokio::time::advance`.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self(ClockKind::Tokio)
    }

    /// Returns the current instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockKind::System => Instant::now(),
            ClockKind::Tokio => tokio::time::Instant::now().into_std(),
            ClockKind::Controlled(control) => control.instant(),
        }
    }

    /// Returns the time elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.instant().saturating_duration_since(earlier)
    }
}

/// Manually controlled passage of time.
///
/// The clock starts at the instant the control was created and only moves
/// forward when [`advance`](Self::advance) is called.
#[derive(Debug, Clone)]
pub struct ClockControl {
    state: Arc<Mutex<ControlState>>,
}

#[derive(Debug)]
struct ControlState {
    origin: Instant,
    offset: Duration,
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl {
    /// Creates a new frozen time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                origin: Instant::now(),
                offset: Duration::ZERO,
            })),
        }
    }

    /// Returns a clock that observes this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock(ClockKind::Controlled(self.clone()))
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.offset = state.offset.saturating_add(duration);
    }

    /// Moves time forward by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    fn instant(&self) -> Instant {
        let state = self.state.lock();
        state.origin + state.offset
    }
}
