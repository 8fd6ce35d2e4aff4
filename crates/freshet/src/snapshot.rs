// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Immutable views of a cache entry.

use std::time::Instant;

use crate::ErrorInfo;

/// The fetch lifecycle state of a cache entry.
///
/// A single status replaces separate `loading`/`syncing`/`refreshing` flags:
/// whether a value is visible is answered by [`Snapshot::value`], whether work
/// is pending by [`Status::is_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// No fetch is pending. Either nothing has been requested yet, or the
    /// last request settled and a value (possibly with a `last_error`) is
    /// available.
    #[default]
    Idle,
    /// A fetch is in flight and there is no value to show yet.
    Loading,
    /// A fetch is in flight while a previous value stays visible.
    Refreshing,
    /// The most recent fetch failed and there is no value to fall back to.
    Error,
}

impl Status {
    /// Returns true while a fetch or write is in flight.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Loading | Self::Refreshing)
    }

    /// Returns the lowercase name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Refreshing => "refreshing",
            Self::Error => "error",
        }
    }

    /// The status an entry takes when a fetch starts.
    pub(crate) fn pending(has_value: bool) -> Self {
        if has_value { Self::Refreshing } else { Self::Loading }
    }

    /// The status an entry settles into once nothing is in flight.
    pub(crate) fn settled(has_value: bool, has_error: bool) -> Self {
        if !has_value && has_error { Self::Error } else { Self::Idle }
    }
}

/// A read of a cache entry's state at one instant.
///
/// Snapshots are handed to listeners and returned by
/// [`FetchCache::get`](crate::FetchCache::get). They never change after
/// creation; a later transition produces a new snapshot with a higher
/// [`revision`](Self::revision).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub(crate) value: Option<T>,
    pub(crate) status: Status,
    pub(crate) last_error: Option<ErrorInfo>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) revision: u64,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: Status::Idle,
            last_error: None,
            fetched_at: None,
            revision: 0,
        }
    }
}

impl<T> Snapshot<T> {
    /// Returns the last successfully fetched value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consumes the snapshot and returns the value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Returns the entry's status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns the failure of the most recent settled fetch, if it failed.
    ///
    /// A snapshot can carry both a value and an error: stale data stays
    /// visible after a failed refresh.
    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Returns when the current value was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    /// Returns the entry's revision at the time of the snapshot.
    ///
    /// Every state transition of an entry increments its revision, so an
    /// observer that receives snapshots out of order can keep only the
    /// newest one.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns true when the entry has neither a value nor an error and no
    /// fetch is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.last_error.is_none() && self.status == Status::Idle
    }
}
