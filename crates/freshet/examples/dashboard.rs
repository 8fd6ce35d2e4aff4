// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dashboard Example
//!
//! Two views share one cached summary while a poller keeps it warm. A user
//! hammers the sync button, and a campaign is paused optimistically.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use freshet::{CachedResource, Clock, ErrorInfo, FetchCache, ResourceKey};
use tracing::Level;

#[derive(Debug, Clone)]
struct Summary {
    clicks: u32,
    flagged: u32,
}

/// Stand-in for the backend API.
#[derive(Clone, Default)]
struct Api {
    calls: Arc<AtomicU32>,
}

impl Api {
    async fn summary(&self) -> Result<Summary, ErrorInfo> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Summary {
            clicks: 1_000 + n * 37,
            flagged: n % 3,
        })
    }

    async fn set_paused(&self, paused: bool) -> Result<bool, ErrorInfo> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if paused {
            Err(ErrorInfo::msg("campaign is locked by another editor"))
        } else {
            Ok(paused)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), freshet::Error> {
    tracing::subscriber::set_global_default(tracing_subscriber::fmt().with_max_level(Level::DEBUG).finish())
        .expect("no other global subscriber is installed");

    let api = Api::default();
    let summaries = FetchCache::builder::<Summary>(Clock::new_tokio())
        .name("dashboard")
        .max_age(Duration::from_secs(2))
        .build();
    let key = ResourceKey::compose("dashboard-summary", "ws-1", ["30d"])?;

    // Both views mount the same key; only one request goes out.
    let fetch = {
        let api = api.clone();
        move || {
            let api = api.clone();
            async move { api.summary().await }
        }
    };
    let mut header = CachedResource::mount(&summaries, key.clone(), fetch.clone());
    let sidebar = CachedResource::mount(&summaries, key.clone(), fetch);

    let loaded = header.changed().await;
    println!("header sees {:?} ({:?})", loaded.value(), loaded.status());
    println!("sidebar sees {:?}", sidebar.value());

    // Keep the summary warm in the background.
    let poller = tokio::spawn(header.poll(Duration::from_secs(1)));

    // Rapid sync clicks collapse into one request.
    for click in 0..5 {
        match header.refresh().await {
            Ok(summary) => println!("sync click {click}: {} clicks, {} flagged", summary.clicks, summary.flagged),
            Err(error) => println!("sync click {click} failed: {error}"),
        }
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    println!("after polling: {:?}, api calls: {}", header.value(), api.calls.load(Ordering::Relaxed));

    // Optimistic toggle that the backend rejects.
    let campaigns = FetchCache::builder::<bool>(Clock::new_tokio()).name("campaign-status").build();
    let paused = ResourceKey::compose("campaign-paused", "ws-1", ["cmp-7"])?;
    let _ = campaigns.force_refresh(&paused, || async { Ok::<_, ErrorInfo>(false) }).await?;

    let write = campaigns.mutate(&paused, true, {
        let api = api.clone();
        move || async move { api.set_paused(true).await }
    });
    println!("optimistic: {:?}", campaigns.peek(&paused).and_then(|s| s.into_value()));
    if let Err(error) = write.await {
        println!("write failed ({error}), rolled back to {:?}", campaigns.peek(&paused).and_then(|s| s.into_value()));
    }

    drop(header);
    drop(sidebar);
    poller.abort();
    Ok(())
}
