// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runtime abstraction for driving background fetches.

use std::{fmt, pin::Pin, sync::Arc};

/// A boxed, pinned future handed to custom spawners.
pub type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Drives fetches that nobody is awaiting.
///
/// Stale-while-revalidate reads return immediately, so the revalidation they
/// trigger has to make progress on its own. The cache hands such work to its
/// spawner. Manual refreshes are spawned too, so dropping the future returned
/// by [`FetchCache::force_refresh`](crate::FetchCache::force_refresh) never
/// strands an entry in a pending state.
///
/// # Examples
///
/// ```
/// use freshet::Spawner;
///
/// let spawner = Spawner::new_custom(|fut| {
///     std::thread::spawn(move || futures::executor::block_on(fut));
/// });
/// # let _ = spawner;
/// ```
#[derive(Clone)]
pub struct Spawner(SpawnerKind);

#[derive(Clone)]
enum SpawnerKind {
    Tokio,
    Custom(Arc<dyn Fn(BoxedFuture) + Send + Sync>),
}

impl Spawner {
    /// Creates a spawner that uses the ambient Tokio runtime.
    ///
    /// When work is spawned outside of a Tokio runtime context, it runs to
    /// completion on a dedicated thread instead.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self(SpawnerKind::Tokio)
    }

    /// Creates a spawner from a closure.
    ///
    /// The closure receives a boxed future and is responsible for running it
    /// to completion on the runtime of its choice.
    pub fn new_custom<F>(f: F) -> Self
    where
        F: Fn(BoxedFuture) + Send + Sync + 'static,
    {
        Self(SpawnerKind::Custom(Arc::new(f)))
    }

    pub(crate) fn spawn(&self, work: impl Future<Output = ()> + Send + 'static) {
        match &self.0 {
            SpawnerKind::Tokio => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    drop(handle.spawn(work));
                }
                Err(_) => {
                    std::thread::spawn(move || futures::executor::block_on(work));
                }
            },
            SpawnerKind::Custom(spawn) => spawn(Box::pin(work)),
        }
    }
}

impl Default for Spawner {
    fn default() -> Self {
        Self::new_tokio()
    }
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SpawnerKind::Tokio => f.write_str("Spawner::Tokio"),
            SpawnerKind::Custom(_) => f.write_str("Spawner::Custom"),
        }
    }
}
