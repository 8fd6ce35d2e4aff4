// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for entry eviction.

use std::time::Duration;

use freshet::{ClockControl, ErrorInfo, FetchCache, ResourceKey, Spawner};

fn key(raw: &str) -> ResourceKey {
    ResourceKey::new(raw).unwrap()
}

/// Runs fetches inline so entries settle before `get` returns.
fn inline_spawner() -> Spawner {
    Spawner::new_custom(futures::executor::block_on)
}

fn load(cache: &FetchCache<u32>, raw: &str) {
    let _ = cache.get(&key(raw), || async { Ok::<_, ErrorInfo>(1) });
}

#[test]
fn least_recently_released_entry_is_evicted_first() {
    let control = ClockControl::new();
    let cache = FetchCache::builder::<u32>(control.to_clock())
        .max_entries(3)
        .spawner(inline_spawner())
        .build();

    let a = cache.subscribe(&key("a"), |_| {});
    let b = cache.subscribe(&key("b"), |_| {});
    load(&cache, "c");

    control.advance_millis(10);
    drop(b);
    control.advance_millis(10);
    drop(a);

    // "c" was released at creation, "b" 10ms later and "a" last.
    load(&cache, "d");
    assert!(!cache.contains(&key("c")));

    load(&cache, "e");
    assert!(!cache.contains(&key("b")));
    assert!(cache.contains(&key("a")));
    assert_eq!(cache.len(), 3);
}

#[test]
fn observed_entries_are_never_evicted() {
    let control = ClockControl::new();
    let cache = FetchCache::builder::<u32>(control.to_clock())
        .max_entries(2)
        .spawner(inline_spawner())
        .build();

    let _a = cache.subscribe(&key("a"), |_| {});
    let _b = cache.subscribe(&key("b"), |_| {});
    load(&cache, "c");

    assert_eq!(cache.len(), 3);
    assert!(cache.contains(&key("a")));
    assert!(cache.contains(&key("b")));
}

#[test]
fn purge_idle_drops_only_expired_unobserved_entries() {
    let control = ClockControl::new();
    let cache = FetchCache::builder::<u32>(control.to_clock())
        .idle_timeout(Duration::from_secs(60))
        .spawner(inline_spawner())
        .build();

    load(&cache, "old");
    let _watched = cache.subscribe(&key("watched"), |_| {});
    control.advance(Duration::from_secs(45));
    load(&cache, "recent");
    control.advance(Duration::from_secs(30));

    assert_eq!(cache.purge_idle(), 1);
    assert!(!cache.contains(&key("old")));
    assert!(cache.contains(&key("recent")));
    assert!(cache.contains(&key("watched")));
}

#[test]
fn purge_idle_without_timeout_keeps_everything() {
    let control = ClockControl::new();
    let cache = FetchCache::builder::<u32>(control.to_clock()).spawner(inline_spawner()).build();

    load(&cache, "a");
    control.advance(Duration::from_secs(3600));

    assert_eq!(cache.purge_idle(), 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn evicted_key_starts_over() {
    let control = ClockControl::new();
    let cache = FetchCache::builder::<u32>(control.to_clock())
        .max_entries(1)
        .spawner(inline_spawner())
        .build();

    load(&cache, "a");
    load(&cache, "b");
    assert!(cache.peek(&key("a")).is_none());

    let snapshot = cache.get(&key("a"), || async { Ok::<_, ErrorInfo>(2) });
    assert!(snapshot.value().is_none());
    assert_eq!(cache.peek(&key("a")).unwrap().value(), Some(&2));
}
