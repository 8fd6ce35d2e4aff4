// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Stale-while-revalidate caching for async fetches.
//!
//! Several views often show the same remote aggregate, refresh it on a timer
//! and let the user force a refresh. This crate gives them one shared
//! [`FetchCache`] that:
//!
//! - Runs at most one request per [`ResourceKey`] at a time, attaching
//!   concurrent reads and refreshes to it
//! - Serves stale values immediately while revalidating in the background
//! - Applies results in start order, so a slow early request never overwrites
//!   a newer one
//! - Throttles repeated manual refreshes with a minimum refresh interval
//! - Keeps the previous value visible when a refresh fails
//! - Supports optimistic mutations that roll back on failure
//! - Reports a single [`Status`] per entry instead of ad hoc loading flags
//!
//! Views observe entries with [`FetchCache::subscribe`] or, more
//! conveniently, through a mounted [`CachedResource`].
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use freshet::{Clock, ErrorInfo, FetchCache, ResourceKey, Status};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), freshet::Error> {
//! let cache = FetchCache::builder::<u32>(Clock::new_tokio())
//!     .name("dashboard")
//!     .max_age(Duration::from_secs(30))
//!     .build();
//!
//! let key = ResourceKey::compose("fraud-summary", "ws-1", ["7d"])?;
//!
//! // Listeners see every transition of the entry.
//! let _subscription = cache.subscribe(&key, |snapshot| {
//!     println!("fraud summary is {:?}", snapshot.status());
//! });
//!
//! let snapshot = cache.get(&key, || async { Ok::<_, ErrorInfo>(3) });
//! assert_eq!(snapshot.status(), Status::Loading);
//!
//! let flagged = cache.force_refresh(&key, || async { Ok::<_, ErrorInfo>(4) }).await?;
//! assert_eq!(flagged, 3);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `logs` (default): emit `tracing` events for cache activity.
//! - `metrics`: report OpenTelemetry metrics through a meter passed to
//!   `FetchCacheBuilder::meter`.
//! - `serde`: derive `Serialize` and `Deserialize` for the policy types and
//!   [`ResourceKey`].

pub mod builder;
pub mod cache;
mod clock;
mod entry;
mod error;
mod key;
mod policy;
mod resource;
mod snapshot;
mod spawner;
mod subscription;
mod telemetry;

#[doc(inline)]
pub use builder::FetchCacheBuilder;
#[doc(inline)]
pub use cache::{FetchCache, FetchFuture};
pub use clock::{Clock, ClockControl};
pub use error::{Error, ErrorInfo, Result};
pub use key::ResourceKey;
pub use policy::{DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES, DEFAULT_MIN_REFRESH_INTERVAL, FetchOptions, RefreshPolicy, RetentionPolicy};
pub use resource::CachedResource;
pub use snapshot::{Snapshot, Status};
pub use spawner::{BoxedFuture, Spawner};
pub use subscription::Subscription;
pub use telemetry::CacheName;
