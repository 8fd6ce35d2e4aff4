// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A mounted view of one cache entry.

use std::{
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};

use crate::{Error, ErrorInfo, FetchCache, FetchFuture, FetchOptions, ResourceKey, Snapshot, Status, Subscription};

type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// A view's handle on one cached resource.
///
/// Mounting subscribes to the entry and reads it through the cache, so the
/// first mount of a key starts a fetch and later mounts of the same key share
/// the entry and any request in flight. The latest state is always available
/// through [`snapshot`](Self::snapshot); [`changed`](Self::changed) waits for
/// the next transition. Dropping the resource unsubscribes it.
///
/// Fetch failures are data here. They show up as [`Status::Error`] and
/// [`error`](Self::error), and [`refresh`](Self::refresh) returns them as an
/// `Err` instead of panicking.
///
/// # Examples
///
/// ```
/// use freshet::{CachedResource, Clock, ErrorInfo, FetchCache, ResourceKey, Status};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), freshet::Error> {
/// let cache = FetchCache::builder::<String>(Clock::new_tokio()).build();
/// let key = ResourceKey::compose("dashboard-summary", "ws-1", ["30d"])?;
///
/// let mut summary = CachedResource::mount(&cache, key, || async { Ok::<_, ErrorInfo>("42 clicks".to_string()) });
/// assert_eq!(summary.status(), Status::Loading);
///
/// let snapshot = summary.changed().await;
/// assert_eq!(snapshot.value().map(String::as_str), Some("42 clicks"));
/// # Ok(())
/// # }
/// ```
pub struct CachedResource<T> {
    cache: FetchCache<T>,
    key: ResourceKey,
    fetcher: Fetcher<T>,
    options: FetchOptions,
    updates: Arc<watch::Sender<Snapshot<T>>>,
    state: watch::Receiver<Snapshot<T>>,
    _subscription: Subscription,
}

impl<T> CachedResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Mounts a view of `key`, using the cache's default maximum age.
    pub fn mount<F, Fut, E>(cache: &FetchCache<T>, key: ResourceKey, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        Self::mount_with(cache, key, fetcher, FetchOptions::default())
    }

    /// Mounts a view of `key` with per-view fetch options.
    pub fn mount_with<F, Fut, E>(cache: &FetchCache<T>, key: ResourceKey, fetcher: F, options: FetchOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<ErrorInfo>,
    {
        let fetcher: Fetcher<T> = Arc::new(move || {
            let future = fetcher();
            async move { future.await.map_err(Into::into) }.boxed()
        });

        let (sender, state) = watch::channel(Snapshot::default());
        let updates = Arc::new(sender);

        let listener_updates = Arc::clone(&updates);
        let subscription = cache.subscribe(&key, move |snapshot: &Snapshot<T>| publish(&listener_updates, snapshot));

        let mut resource = Self {
            cache: cache.clone(),
            key,
            fetcher,
            options,
            updates,
            state,
            _subscription: subscription,
        };
        resource.revalidate();
        resource.state.mark_unchanged();
        resource
    }

    /// Returns the key this resource views.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Returns the latest known state of the entry.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<T> {
        self.state.borrow().clone()
    }

    /// Returns the latest value, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.state.borrow().value().cloned()
    }

    /// Returns the entry's current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.borrow().status()
    }

    /// Returns the most recent failure, if it has not been cleared by a
    /// successful fetch.
    #[must_use]
    pub fn error(&self) -> Option<ErrorInfo> {
        self.state.borrow().last_error().cloned()
    }

    /// Waits for the next state transition the view has not seen yet and
    /// returns the resulting snapshot.
    pub async fn changed(&mut self) -> Snapshot<T> {
        // The sender lives in this resource's listener until `self` is dropped.
        let _ = self.state.changed().await;
        self.state.borrow_and_update().clone()
    }

    /// Reads the entry through the cache again, starting a revalidation if the
    /// value is stale. Returns the state right after the read.
    pub fn revalidate(&self) -> Snapshot<T> {
        let snapshot = self.cache.get_with(&self.key, || (self.fetcher)(), &self.options);
        publish(&self.updates, &snapshot);
        snapshot
    }

    /// Forces a refresh of the entry.
    ///
    /// See [`FetchCache::force_refresh`] for how concurrent and rapid
    /// refreshes are coalesced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] if the refresh fails. The view keeps showing
    /// the previous value.
    pub fn refresh(&self) -> impl Future<Output = Result<T, Error>> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        self.cache.force_refresh(&self.key, move || fetcher())
    }

    /// Returns a future that revalidates the entry every `period` for as long
    /// as this resource stays mounted.
    ///
    /// The future must be driven by the caller, typically by spawning it. The
    /// first revalidation happens one `period` after the future is first
    /// polled. Ticks that overlap a pending request attach to it, and stale
    /// checks still follow the cache's refresh policy.
    pub fn poll(&self, period: Duration) -> impl Future<Output = ()> + Send + 'static {
        let cache = self.cache.clone();
        let key = self.key.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let options = self.options;
        let updates = Arc::clone(&self.updates);

        async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;

            loop {
                ticks.tick().await;
                if updates.is_closed() {
                    break;
                }
                let snapshot = cache.get_with(&key, || fetcher(), &options);
                publish(&updates, &snapshot);
            }
        }
    }
}

impl<T> Debug for CachedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.state.borrow();
        f.debug_struct("CachedResource")
            .field("key", &self.key)
            .field("status", &snapshot.status())
            .field("revision", &snapshot.revision())
            .finish_non_exhaustive()
    }
}

/// Publishes `snapshot` unless the view already holds a newer one.
fn publish<T: Clone>(updates: &watch::Sender<Snapshot<T>>, snapshot: &Snapshot<T>) {
    updates.send_if_modified(|current| {
        if snapshot.revision() > current.revision() {
            *current = snapshot.clone();
            true
        } else {
            false
        }
    });
}
