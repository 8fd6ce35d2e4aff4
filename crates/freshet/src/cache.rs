// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The stale-while-revalidate fetch cache.

use std::{
    collections::HashMap,
    fmt::{self, Debug},
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    Clock, Error, ErrorInfo, FetchOptions, RefreshPolicy, ResourceKey, RetentionPolicy, Snapshot, Spawner, Status, Subscription,
    builder::FetchCacheBuilder,
    entry::{EntryState, InFlight, Listener, Notification, SharedRequest},
    telemetry::{CacheActivity, CacheName, CacheOperation, Telemetry},
};

/// A boxed fetch future, as produced by type-erased fetchers.
pub type FetchFuture<T> = BoxFuture<'static, Result<T, ErrorInfo>>;

/// Caches the results of async fetches per [`ResourceKey`] and coordinates
/// refreshes of them.
///
/// `FetchCache` is the single owner of every entry's state. Views read it
/// through [`get`](Self::get) snapshots or [`subscribe`](Self::subscribe)
/// listeners and never mutate it directly. The cache guarantees:
///
/// - **Deduplication**: at most one request per key is in flight. Reads and
///   manual refreshes that arrive while a request is pending attach to it.
/// - **Stale-while-revalidate**: a stale value is returned immediately while a
///   background revalidation runs.
/// - **Supersession**: a request's outcome is applied only if no other request
///   for the same key was started after it, regardless of completion order.
/// - **Non-destructive failures**: a failed refresh keeps the previous value
///   visible and records the failure as `last_error`.
///
/// The handle is cheap to clone; all clones share the same entries.
///
/// # Examples
///
/// ```
/// use freshet::{Clock, ErrorInfo, FetchCache, ResourceKey, Status};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), freshet::Error> {
/// let cache = FetchCache::builder::<u64>(Clock::new_tokio()).build();
/// let key = ResourceKey::compose("campaign-count", "ws-1", ["active"])?;
///
/// // The first read starts a fetch and reports that nothing is loaded yet.
/// let snapshot = cache.get(&key, || async { Ok::<_, ErrorInfo>(12) });
/// assert_eq!(snapshot.status(), Status::Loading);
///
/// // A manual refresh attaches to the request that is already running.
/// let value = cache.force_refresh(&key, || async { Ok::<_, ErrorInfo>(99) }).await?;
/// assert_eq!(value, 12);
/// # Ok(())
/// # }
/// ```
pub struct FetchCache<T> {
    inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T> {
    name: CacheName,
    clock: Clock,
    spawner: Spawner,
    refresh: RefreshPolicy,
    retention: RetentionPolicy,
    telemetry: Telemetry,
    state: Mutex<State<T>>,
}

struct State<T> {
    entries: HashMap<ResourceKey, EntryState<T>>,
    /// Source of request tickets. Shared by all keys so a ticket never
    /// matches an entry that was evicted and created again.
    last_ticket: u64,
}

/// What happens to the visible value if a request fails.
#[derive(Debug, Clone, Copy)]
enum OnFailure {
    Keep,
    /// Restore the last confirmed value.
    RollBack,
}

/// Bookkeeping for one started request, carried to its settlement.
#[derive(Debug, Clone, Copy)]
struct Start {
    ticket: u64,
    at: Instant,
    on_failure: OnFailure,
    operation: CacheOperation,
}

/// How a manual refresh was resolved at call time.
enum Refresh<T> {
    Pending(SharedRequest<T>),
    Ready(Result<T, ErrorInfo>),
}

/// Work collected under the lock and carried out after releasing it.
struct Effects<T> {
    notification: Option<Notification<T>>,
    spawn: Option<SharedRequest<T>>,
    evicted: Vec<ResourceKey>,
}

impl<T> Default for Effects<T> {
    fn default() -> Self {
        Self {
            notification: None,
            spawn: None,
            evicted: Vec::new(),
        }
    }
}

impl<T> Clone for FetchCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for FetchCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("name", &self.inner.name)
            .field("refresh", &self.inner.refresh)
            .field("retention", &self.inner.retention)
            .finish_non_exhaustive()
    }
}

impl FetchCache<()> {
    /// Creates a new cache builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use freshet::{Clock, FetchCache};
    ///
    /// let cache = FetchCache::builder::<String>(Clock::new_system())
    ///     .name("dashboard")
    ///     .max_age(Duration::from_secs(60))
    ///     .build();
    /// assert_eq!(cache.name(), "dashboard");
    /// ```
    #[must_use]
    pub fn builder<T>(clock: Clock) -> FetchCacheBuilder<T> {
        FetchCacheBuilder::new(clock)
    }
}

impl<T> FetchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        name: CacheName,
        clock: Clock,
        spawner: Spawner,
        refresh: RefreshPolicy,
        retention: RetentionPolicy,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                clock,
                spawner,
                refresh,
                retention,
                telemetry,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    last_ticket: 0,
                }),
            }),
        }
    }

    /// Returns the name of this cache used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.inner.name
    }

    /// Returns the clock the cache measures staleness with.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the cache's refresh policy.
    #[must_use]
    pub fn refresh_policy(&self) -> &RefreshPolicy {
        &self.inner.refresh
    }

    /// Returns the cache's retention policy.
    #[must_use]
    pub fn retention_policy(&self) -> &RetentionPolicy {
        &self.inner.retention
    }

    /// Reads an entry, fetching or revalidating it in the background when
    /// needed, using the cache's default maximum age.
    ///
    /// See [`get_with`](Self::get_with).
    pub fn get<F, Fut, E>(&self, key: &ResourceKey, fetcher: F) -> Snapshot<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        self.get_with(key, fetcher, &FetchOptions::default())
    }

    /// Reads an entry, fetching or revalidating it in the background when
    /// needed.
    ///
    /// The entry is created on first use. A fetch is started, and `fetcher`
    /// called, only when no request for `key` is in flight and one of these
    /// holds:
    ///
    /// - the entry has no value,
    /// - the value is at least `max_age` old,
    /// - the last fetch failed without a value to fall back to and the
    ///   refresh interval has passed since it started.
    ///
    /// The returned snapshot reflects the state right after that decision, so
    /// a read that starts a fetch reports [`Status::Loading`] or
    /// [`Status::Refreshing`] while still carrying any stale value.
    ///
    /// Fetch failures never surface here; they are reported through the
    /// snapshot's status and `last_error`.
    pub fn get_with<F, Fut, E>(&self, key: &ResourceKey, fetcher: F, options: &FetchOptions) -> Snapshot<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        let now = self.inner.clock.instant();
        let max_age = options.effective_max_age(&self.inner.refresh);
        let mut effects = Effects::default();

        let (snapshot, activity) = {
            let mut state = self.inner.state.lock();
            let (entry, ticket) = state.entry_for_start(key, now, &self.inner.retention, &mut effects.evicted);

            let activity = if entry.in_flight.is_some() {
                CacheActivity::Joined
            } else {
                match entry.fetched_at {
                    Some(fetched_at) if RefreshPolicy::is_stale(max_age, fetched_at, now) => CacheActivity::Stale,
                    Some(_) => CacheActivity::Hit,
                    None if entry.status == Status::Error && self.inner.refresh.is_throttled(entry.last_started, now) => {
                        CacheActivity::Throttled
                    }
                    // A value without a fetch time was never confirmed.
                    None if entry.value.is_some() => CacheActivity::Stale,
                    None => CacheActivity::Miss,
                }
            };

            if matches!(activity, CacheActivity::Stale | CacheActivity::Miss) {
                let request = into_request(fetcher);
                let start = Start {
                    ticket,
                    at: now,
                    on_failure: OnFailure::Keep,
                    operation: CacheOperation::Get,
                };
                let (shared, notification) = self.launch(key, entry, start, request);
                effects.spawn = Some(shared);
                effects.notification = Some(notification);
            }

            let snapshot = effects
                .notification
                .as_ref()
                .map_or_else(|| entry.snapshot(), |notification| notification.snapshot().clone());
            (snapshot, activity)
        };

        self.record(key, CacheOperation::Get, activity);
        self.apply(effects);
        snapshot
    }

    /// Refreshes an entry regardless of its age.
    ///
    /// The decision is made when this method is called, not when the returned
    /// future is first polled:
    ///
    /// - If a request for `key` is in flight, the returned future resolves with
    ///   that request's outcome and `fetcher` is not called.
    /// - If the previous request started less than the minimum refresh
    ///   interval ago, the cached value is returned, or the last failure if
    ///   there is no value, without fetching.
    /// - Otherwise `fetcher` is called and a new request starts.
    ///
    /// The request is driven by the cache's spawner, so dropping the returned
    /// future does not cancel it.
    ///
    /// # Errors
    ///
    /// Resolves to [`Error::Fetch`] if the request fails. The entry keeps its
    /// previous value in that case.
    pub fn force_refresh<F, Fut, E>(&self, key: &ResourceKey, fetcher: F) -> impl Future<Output = Result<T, Error>> + Send + 'static
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        let now = self.inner.clock.instant();
        let mut effects = Effects::default();

        let (refresh, activity) = {
            let mut state = self.inner.state.lock();
            let (entry, ticket) = state.entry_for_start(key, now, &self.inner.retention, &mut effects.evicted);

            if let Some(in_flight) = &entry.in_flight {
                (Refresh::Pending(in_flight.request.clone()), CacheActivity::Joined)
            } else if let Some(cached) = throttled_result(entry, &self.inner.refresh, now) {
                (Refresh::Ready(cached), CacheActivity::Throttled)
            } else {
                let activity = if entry.value.is_some() {
                    CacheActivity::Stale
                } else {
                    CacheActivity::Miss
                };
                let request = into_request(fetcher);
                let start = Start {
                    ticket,
                    at: now,
                    on_failure: OnFailure::Keep,
                    operation: CacheOperation::ForceRefresh,
                };
                let (shared, notification) = self.launch(key, entry, start, request);
                effects.spawn = Some(shared.clone());
                effects.notification = Some(notification);
                (Refresh::Pending(shared), activity)
            }
        };

        self.record(key, CacheOperation::ForceRefresh, activity);
        self.apply(effects);

        let key = key.clone();
        async move {
            let result = match refresh {
                Refresh::Pending(request) => request.await,
                Refresh::Ready(result) => result,
            };
            result.map_err(|info| Error::Fetch { key, info })
        }
    }

    /// Applies a value optimistically, then confirms it with a write.
    ///
    /// `optimistic` becomes visible to every observer right away and the entry
    /// reports [`Status::Refreshing`] until `write` settles. On success, the
    /// value `write` returns replaces the optimistic one as a freshly fetched
    /// value. On failure, the last value a request succeeded with is restored
    /// and the failure is recorded as `last_error`. Optimistic values of other
    /// pending mutations are never restored, and if the entry was invalidated
    /// after its last success it is left empty.
    ///
    /// A mutation supersedes any request already in flight for `key`, and is
    /// itself superseded by any request started after it. While the write is
    /// pending, reads and manual refreshes attach to it.
    ///
    /// # Errors
    ///
    /// Resolves to [`Error::Write`] if `write` fails.
    pub fn mutate<F, Fut, E>(&self, key: &ResourceKey, optimistic: T, write: F) -> impl Future<Output = Result<T, Error>> + Send + 'static
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        let now = self.inner.clock.instant();
        let mut effects = Effects::default();

        let request = {
            let mut state = self.inner.state.lock();
            let (entry, ticket) = state.entry_for_start(key, now, &self.inner.retention, &mut effects.evicted);

            entry.value = Some(optimistic);
            let request = into_request(write);
            let start = Start {
                ticket,
                at: now,
                on_failure: OnFailure::RollBack,
                operation: CacheOperation::Mutate,
            };
            let (shared, notification) = self.launch(key, entry, start, request);
            effects.spawn = Some(shared.clone());
            effects.notification = Some(notification);
            shared
        };

        self.apply(effects);

        let key = key.clone();
        async move { request.await.map_err(|info| Error::Write { key, info }) }
    }

    /// Forgets the value, fetch time and last error of an entry.
    ///
    /// The entry returns to [`Status::Idle`] and its refresh interval is reset,
    /// so the next read or manual refresh fetches again. A request that is
    /// still in flight is not cancelled: its outcome is applied if no newer
    /// request was started in the meantime and discarded otherwise.
    pub fn invalidate(&self, key: &ResourceKey) {
        let notification = {
            let mut state = self.inner.state.lock();
            state.entries.get_mut(key).map(|entry| {
                entry.value = None;
                entry.fetched_at = None;
                entry.confirmed = None;
                entry.last_error = None;
                entry.in_flight = None;
                entry.last_started = None;
                entry.status = Status::Idle;
                entry.transition()
            })
        };

        if let Some(notification) = notification {
            self.record(key, CacheOperation::Invalidate, CacheActivity::Invalidated);
            notification.deliver();
        }
    }

    /// Registers a listener that is called with a snapshot on every state
    /// transition of `key`.
    ///
    /// Transitions are a request starting, a value or failure being applied,
    /// a mutation being applied or rolled back and an invalidation. Listeners
    /// of one key are called in subscription order. A listener registered
    /// while another listener is being called only hears about later
    /// transitions.
    ///
    /// Subscribing does not fetch. The entry is created if needed and is kept
    /// from eviction while it has subscribers.
    pub fn subscribe<L>(&self, key: &ResourceKey, listener: L) -> Subscription
    where
        L: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let now = self.inner.clock.instant();
        let listener: Listener<T> = Arc::new(listener);
        let mut evicted = Vec::new();

        let id = {
            let mut state = self.inner.state.lock();
            let (entry, _) = state.entry_for_start(key, now, &self.inner.retention, &mut evicted);
            entry.add_listener(listener)
        };
        self.record_evictions(&evicted);

        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let now = inner.clock.instant();
                if let Some(entry) = inner.state.lock().entries.get_mut(&key) {
                    entry.remove_listener(id, now);
                }
            }
        })
    }

    /// Returns the current state of `key` without fetching, or `None` if the
    /// key has never been used.
    #[must_use]
    pub fn peek(&self, key: &ResourceKey) -> Option<Snapshot<T>> {
        self.inner.state.lock().entries.get(key).map(EntryState::snapshot)
    }

    /// Returns the number of active subscriptions for `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map_or(0, EntryState::subscriber_count)
    }

    /// Returns the number of entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Returns true if the cache holds an entry for `key`.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Evicts every entry that has had no subscribers and no request in flight
    /// for longer than the retention policy's idle timeout.
    ///
    /// Returns the number of evicted entries. Does nothing when no idle
    /// timeout is configured.
    pub fn purge_idle(&self) -> usize {
        let now = self.inner.clock.instant();
        let evicted = {
            let mut state = self.inner.state.lock();
            state.purge_idle(now, &self.inner.retention)
        };
        self.record_evictions(&evicted);
        evicted.len()
    }

    /// Starts a request for an entry. Must be called with the state lock held.
    fn launch(
        &self,
        key: &ResourceKey,
        entry: &mut EntryState<T>,
        start: Start,
        request: FetchFuture<T>,
    ) -> (SharedRequest<T>, Notification<T>) {
        let inner = Arc::downgrade(&self.inner);
        let settle_key = key.clone();

        let shared = async move {
            let result = AssertUnwindSafe(request)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ErrorInfo::msg("fetcher panicked")));
            Inner::settle(&inner, &settle_key, start, &result);
            result
        }
        .boxed()
        .shared();

        entry.ticket = start.ticket;
        entry.last_started = Some(start.at);
        entry.in_flight = Some(InFlight {
            ticket: start.ticket,
            request: shared.clone(),
        });
        entry.status = Status::pending(entry.value.is_some());

        (shared, entry.transition())
    }

    fn apply(&self, effects: Effects<T>) {
        self.record_evictions(&effects.evicted);
        if let Some(notification) = effects.notification {
            notification.deliver();
        }
        if let Some(request) = effects.spawn {
            self.inner.spawner.spawn(request.map(drop));
        }
    }

    fn record(&self, key: &ResourceKey, operation: CacheOperation, activity: CacheActivity) {
        self.inner.telemetry.record(self.inner.name, key, operation, activity, None);
    }

    fn record_evictions(&self, evicted: &[ResourceKey]) {
        if evicted.is_empty() {
            return;
        }
        for key in evicted {
            self.record(key, CacheOperation::Evict, CacheActivity::Evicted);
        }
        self.inner.telemetry.record_entries(self.inner.name, self.len());
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Applies the outcome of a request unless a newer request was started.
    fn settle(this: &Weak<Self>, key: &ResourceKey, start: Start, result: &Result<T, ErrorInfo>) {
        let Some(inner) = this.upgrade() else {
            return;
        };
        let now = inner.clock.instant();
        let elapsed = Some(now.saturating_duration_since(start.at));

        let (activity, notification) = {
            let mut state = inner.state.lock();
            match state.entries.get_mut(key) {
                None => (CacheActivity::Superseded, None),
                Some(entry) => {
                    if entry.in_flight.as_ref().is_some_and(|in_flight| in_flight.ticket == start.ticket) {
                        entry.in_flight = None;
                    }

                    if entry.ticket == start.ticket {
                        let activity = match result {
                            Ok(value) => {
                                let fetched_at = entry.fetched_at.map_or(now, |previous| previous.max(now));
                                entry.value = Some(value.clone());
                                entry.fetched_at = Some(fetched_at);
                                entry.confirmed = Some((value.clone(), fetched_at));
                                entry.last_error = None;
                                CacheActivity::Fetched
                            }
                            Err(error) => {
                                entry.last_error = Some(error.clone());
                                match start.on_failure {
                                    OnFailure::Keep => CacheActivity::Failed,
                                    OnFailure::RollBack => {
                                        entry.roll_back();
                                        CacheActivity::RolledBack
                                    }
                                }
                            }
                        };
                        entry.status = Status::settled(entry.value.is_some(), entry.last_error.is_some());
                        (activity, Some(entry.transition()))
                    } else {
                        (CacheActivity::Superseded, None)
                    }
                }
            }
        };

        inner.record(key, start.operation, activity, elapsed);
        if let Some(notification) = notification {
            notification.deliver();
        }
    }

    fn record(&self, key: &ResourceKey, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        self.telemetry.record(self.name, key, operation, activity, duration);
    }
}

impl<T: Clone> State<T> {
    /// Returns the entry for `key`, creating it if needed, together with a
    /// fresh ticket for a request that may be started on it.
    fn entry_for_start(
        &mut self,
        key: &ResourceKey,
        now: Instant,
        retention: &RetentionPolicy,
        evicted: &mut Vec<ResourceKey>,
    ) -> (&mut EntryState<T>, u64) {
        if !self.entries.contains_key(key) {
            evicted.extend(self.make_room(now, retention));
        }
        self.last_ticket += 1;
        let ticket = self.last_ticket;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| EntryState::new(now));
        (entry, ticket)
    }

    /// Frees space for one more entry.
    fn make_room(&mut self, now: Instant, retention: &RetentionPolicy) -> Vec<ResourceKey> {
        let mut evicted = self.purge_idle(now, retention);

        while self.entries.len() >= retention.max_entries.max(1) {
            let oldest = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_evictable())
                .min_by_key(|(_, entry)| entry.released_at)
                .map(|(key, _)| key.clone());

            let Some(oldest) = oldest else {
                #[cfg(feature = "logs")]
                tracing::warn!(
                    cache.entries = self.entries.len(),
                    cache.max_entries = retention.max_entries,
                    "every entry is observed or in flight, growing past max_entries"
                );
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }

        evicted
    }

    fn purge_idle(&mut self, now: Instant, retention: &RetentionPolicy) -> Vec<ResourceKey> {
        let Some(idle_timeout) = retention.idle_timeout else {
            return Vec::new();
        };

        let expired: Vec<ResourceKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_evictable() && now.saturating_duration_since(entry.released_at) >= idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }
}

fn into_request<T, F, Fut, E>(fetcher: F) -> FetchFuture<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<ErrorInfo>,
{
    let future = fetcher();
    async move { future.await.map_err(Into::into) }.boxed()
}

/// The cached outcome a throttled manual refresh resolves to, if any.
fn throttled_result<T: Clone>(entry: &EntryState<T>, policy: &RefreshPolicy, now: Instant) -> Option<Result<T, ErrorInfo>> {
    if !policy.is_throttled(entry.last_started, now) {
        return None;
    }
    match (&entry.value, &entry.last_error) {
        (Some(value), _) => Some(Ok(value.clone())),
        (None, Some(error)) => Some(Err(error.clone())),
        (None, None) => None,
    }
}
