// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for optimistic writes through `FetchCache::mutate()`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use freshet::{Clock, Error, ErrorInfo, FetchCache, ResourceKey, Status};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CampaignStatus {
    Active,
    Paused,
}

fn cache() -> FetchCache<CampaignStatus> {
    FetchCache::builder::<CampaignStatus>(Clock::new_tokio()).build()
}

async fn loaded(cache: &FetchCache<CampaignStatus>, key: &ResourceKey) {
    let _ = cache.get(key, || async { Ok::<_, ErrorInfo>(CampaignStatus::Active) });
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn optimistic_value_is_visible_until_write_confirms() {
    let cache = cache();
    let key = ResourceKey::compose("campaign-status", "ws-1", ["cmp-7"]).unwrap();
    loaded(&cache, &key).await;

    let write = cache.mutate(&key, CampaignStatus::Paused, || async {
        sleep(Duration::from_millis(100)).await;
        Ok::<_, ErrorInfo>(CampaignStatus::Paused)
    });

    let pending = cache.peek(&key).unwrap();
    assert_eq!(pending.value(), Some(&CampaignStatus::Paused));
    assert_eq!(pending.status(), Status::Refreshing);

    assert_eq!(write.await.unwrap(), CampaignStatus::Paused);

    let confirmed = cache.peek(&key).unwrap();
    assert_eq!(confirmed.value(), Some(&CampaignStatus::Paused));
    assert_eq!(confirmed.status(), Status::Idle);
    assert!(confirmed.fetched_at() > pending.fetched_at());
}

#[tokio::test(start_paused = true)]
async fn failed_write_rolls_back_to_confirmed_value() {
    let cache = cache();
    let key = ResourceKey::compose("campaign-status", "ws-1", ["cmp-7"]).unwrap();
    loaded(&cache, &key).await;

    let result = cache
        .mutate(&key, CampaignStatus::Paused, || async {
            sleep(Duration::from_millis(50)).await;
            Err::<CampaignStatus, _>(ErrorInfo::msg("campaign is locked"))
        })
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, Error::Write { .. }));
    assert_eq!(error.info().map(ErrorInfo::message), Some("campaign is locked"));

    let snapshot = cache.peek(&key).unwrap();
    assert_eq!(snapshot.value(), Some(&CampaignStatus::Active));
    assert_eq!(snapshot.status(), Status::Idle);
    assert_eq!(snapshot.last_error().map(ErrorInfo::message), Some("campaign is locked"));
}

#[tokio::test(start_paused = true)]
async fn failed_write_without_prior_value_shows_error() {
    let cache = cache();
    let key = ResourceKey::compose("campaign-status", "ws-1", ["cmp-8"]).unwrap();

    let result = cache
        .mutate(&key, CampaignStatus::Active, || async { Err::<CampaignStatus, _>(ErrorInfo::msg("forbidden")) })
        .await;

    assert!(result.is_err());
    let snapshot = cache.peek(&key).unwrap();
    assert!(snapshot.value().is_none());
    assert_eq!(snapshot.status(), Status::Error);
}

#[tokio::test(start_paused = true)]
async fn reads_during_write_join_it() {
    let cache = cache();
    let key = ResourceKey::compose("campaign-status", "ws-1", ["cmp-7"]).unwrap();
    loaded(&cache, &key).await;

    let write = cache.mutate(&key, CampaignStatus::Paused, || async {
        sleep(Duration::from_millis(100)).await;
        Ok::<_, ErrorInfo>(CampaignStatus::Paused)
    });

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let snapshot = cache.get(&key, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ErrorInfo>(CampaignStatus::Active) }
    });
    assert_eq!(snapshot.value(), Some(&CampaignStatus::Paused));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);

    let refreshed = cache.force_refresh(&key, || async { Ok::<_, ErrorInfo>(CampaignStatus::Active) }).await.unwrap();
    assert_eq!(refreshed, CampaignStatus::Paused);
    assert_eq!(write.await.unwrap(), CampaignStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn write_supersedes_fetch_in_flight() {
    let cache = cache();
    let key = ResourceKey::compose("campaign-status", "ws-1", ["cmp-7"]).unwrap();

    let _ = cache.get(&key, || async {
        sleep(Duration::from_millis(200)).await;
        Ok::<_, ErrorInfo>(CampaignStatus::Active)
    });
    sleep(Duration::from_millis(10)).await;

    let written = cache
        .mutate(&key, CampaignStatus::Paused, || async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, ErrorInfo>(CampaignStatus::Paused)
        })
        .await
        .unwrap();
    assert_eq!(written, CampaignStatus::Paused);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.peek(&key).unwrap().value(), Some(&CampaignStatus::Paused));
}

fn counter_cache() -> FetchCache<u32> {
    FetchCache::builder::<u32>(Clock::new_tokio()).build()
}

#[tokio::test(start_paused = true)]
async fn overlapping_write_failure_restores_confirmed_value() {
    let cache = counter_cache();
    let key = ResourceKey::compose("budget", "ws-1", ["cmp-7"]).unwrap();
    let _ = cache.get(&key, || async { Ok::<_, ErrorInfo>(1) });
    sleep(Duration::from_millis(10)).await;

    let first = cache.mutate(&key, 2, || async {
        sleep(Duration::from_millis(500)).await;
        Ok::<_, ErrorInfo>(2)
    });
    let second = cache.mutate(&key, 3, || async {
        sleep(Duration::from_millis(50)).await;
        Err::<u32, _>(ErrorInfo::msg("budget is locked"))
    });
    assert_eq!(cache.peek(&key).unwrap().value(), Some(&3));

    assert!(second.await.is_err());
    let rolled_back = cache.peek(&key).unwrap();
    assert_eq!(rolled_back.value(), Some(&1));
    assert_eq!(rolled_back.status(), Status::Idle);
    assert!(rolled_back.fetched_at().is_some());

    // The first write was started earlier, so its outcome is discarded.
    assert_eq!(first.await.unwrap(), 2);
    assert_eq!(cache.peek(&key).unwrap().value(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn overlapping_writes_on_empty_entry_leave_it_empty_on_failure() {
    let cache = counter_cache();
    let key = ResourceKey::compose("budget", "ws-1", ["cmp-9"]).unwrap();

    let first = cache.mutate(&key, 1, || async {
        sleep(Duration::from_millis(500)).await;
        Ok::<_, ErrorInfo>(1)
    });
    let second = cache.mutate(&key, 2, || async {
        sleep(Duration::from_millis(50)).await;
        Err::<u32, _>(ErrorInfo::msg("forbidden"))
    });

    assert!(second.await.is_err());
    let snapshot = cache.peek(&key).unwrap();
    assert!(snapshot.value().is_none());
    assert!(snapshot.fetched_at().is_none());
    assert_eq!(snapshot.status(), Status::Error);

    assert_eq!(first.await.unwrap(), 1);
    assert!(cache.peek(&key).unwrap().value().is_none());

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let snapshot = cache.get(&key, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ErrorInfo>(5) }
    });
    assert_eq!(snapshot.status(), Status::Loading);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn write_failing_after_invalidate_leaves_entry_empty() {
    let cache = counter_cache();
    let key = ResourceKey::compose("budget", "ws-1", ["cmp-7"]).unwrap();
    let _ = cache.get(&key, || async { Ok::<_, ErrorInfo>(1) });
    sleep(Duration::from_millis(10)).await;

    let write = cache.mutate(&key, 2, || async {
        sleep(Duration::from_millis(50)).await;
        Err::<u32, _>(ErrorInfo::msg("budget is locked"))
    });
    cache.invalidate(&key);

    assert!(write.await.is_err());
    let snapshot = cache.peek(&key).unwrap();
    assert!(snapshot.value().is_none());
    assert!(snapshot.fetched_at().is_none());

    sleep(Duration::from_secs(120)).await;
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let snapshot = cache.get(&key, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ErrorInfo>(4) }
    });
    assert_eq!(snapshot.status(), Status::Loading);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.peek(&key).unwrap().value(), Some(&4));
}

#[tokio::test(start_paused = true)]
async fn rolled_back_value_ages_like_the_confirmed_one() {
    let cache = counter_cache();
    let key = ResourceKey::compose("budget", "ws-1", ["cmp-7"]).unwrap();
    let _ = cache.get(&key, || async { Ok::<_, ErrorInfo>(1) });
    sleep(Duration::from_millis(10)).await;

    let result = cache
        .mutate(&key, 2, || async { Err::<u32, _>(ErrorInfo::msg("budget is locked")) })
        .await;
    assert!(result.is_err());

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let fresh = cache.get(&key, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ErrorInfo>(6) }
    });
    assert_eq!(fresh.value(), Some(&1));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);

    sleep(cache.refresh_policy().max_age).await;
    let counter = Arc::clone(&fetches);
    let stale = cache.get(&key, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ErrorInfo>(6) }
    });
    assert_eq!(stale.value(), Some(&1));
    assert_eq!(stale.status(), Status::Refreshing);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.peek(&key).unwrap().value(), Some(&6));
}
