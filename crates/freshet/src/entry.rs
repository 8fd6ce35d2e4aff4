// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key state owned by the cache.

use std::{sync::Arc, time::Instant};

use futures::future::{BoxFuture, Shared};

use crate::{ErrorInfo, Snapshot, Status};

pub(crate) type Listener<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

pub(crate) type SharedRequest<T> = Shared<BoxFuture<'static, Result<T, ErrorInfo>>>;

/// The request currently allowed to settle an entry.
pub(crate) struct InFlight<T> {
    pub(crate) ticket: u64,
    pub(crate) request: SharedRequest<T>,
}

/// State of one cached resource.
///
/// Only the cache mutates this, always under its lock.
pub(crate) struct EntryState<T> {
    pub(crate) value: Option<T>,
    pub(crate) fetched_at: Option<Instant>,
    /// The last value a request succeeded with, and when. Failed writes roll
    /// back to it. Cleared by invalidation.
    pub(crate) confirmed: Option<(T, Instant)>,
    pub(crate) status: Status,
    pub(crate) last_error: Option<ErrorInfo>,
    pub(crate) in_flight: Option<InFlight<T>>,
    /// Ticket of the most recently started request. Zero before the first one.
    pub(crate) ticket: u64,
    pub(crate) last_started: Option<Instant>,
    pub(crate) revision: u64,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener_id: u64,
    /// When the entry was created or lost its last subscriber.
    pub(crate) released_at: Instant,
}

impl<T: Clone> EntryState<T> {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            value: None,
            fetched_at: None,
            confirmed: None,
            status: Status::Idle,
            last_error: None,
            in_flight: None,
            ticket: 0,
            last_started: None,
            revision: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            released_at: now,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            value: self.value.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            fetched_at: self.fetched_at,
            revision: self.revision,
        }
    }

    /// Records a state change and captures who has to hear about it.
    pub(crate) fn transition(&mut self) -> Notification<T> {
        self.revision += 1;
        Notification {
            snapshot: self.snapshot(),
            listeners: self.listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect(),
        }
    }

    pub(crate) fn add_listener(&mut self, listener: Listener<T>) -> u64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns true if the listener was registered.
    pub(crate) fn remove_listener(&mut self, id: u64, now: Instant) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        let removed = self.listeners.len() != before;
        if removed && self.listeners.is_empty() {
            self.released_at = now;
        }
        removed
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Restores the last confirmed value, or empties the entry if there is none.
    pub(crate) fn roll_back(&mut self) {
        self.value = self.confirmed.as_ref().map(|(value, _)| value.clone());
        self.fetched_at = self.confirmed.as_ref().map(|(_, fetched_at)| *fetched_at);
    }

    /// Entries nobody observes and nothing will settle can be dropped.
    pub(crate) fn is_evictable(&self) -> bool {
        self.listeners.is_empty() && self.in_flight.is_none()
    }
}

/// A snapshot together with the listeners registered when it was taken.
///
/// Delivered after the cache lock is released, so listeners may call back
/// into the cache. Listeners added while a notification is being delivered
/// are not part of it.
#[must_use]
pub(crate) struct Notification<T> {
    snapshot: Snapshot<T>,
    listeners: Vec<Listener<T>>,
}

impl<T> Notification<T> {
    pub(crate) fn snapshot(&self) -> &Snapshot<T> {
        &self.snapshot
    }

    pub(crate) fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.snapshot);
        }
    }
}
