// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};

use parking_lot::Mutex;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle to a listener registered with
/// [`FetchCache::subscribe`](crate::FetchCache::subscribe).
///
/// The listener stays registered until [`unsubscribe`](Self::unsubscribe) is
/// called or the handle is dropped, whichever comes first.
#[must_use = "dropping a subscription unsubscribes its listener"]
pub struct Subscription {
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Removes the listener. Calling this more than once has no effect.
    pub fn unsubscribe(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    /// Returns true while the listener is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.unsubscribe.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}
