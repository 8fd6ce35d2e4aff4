// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for fetch cache operations.

use std::{fmt, sync::Arc};

use crate::ResourceKey;

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Describes why a fetch or write failed.
///
/// `ErrorInfo` is what a failed fetcher turns into once it reaches the cache.
/// It is stored as the entry's `last_error` and handed to every caller that
/// joined the failing request, which is why it is cheap to clone: the
/// underlying cause is shared behind an [`Arc`].
///
/// Any `std::error::Error + Send + Sync + 'static` converts into `ErrorInfo`
/// with `?` or `.into()`. For plain messages use [`ErrorInfo::msg`].
///
/// `ErrorInfo` intentionally does not implement [`std::error::Error`] itself,
/// which is what makes the blanket conversion possible. Wrap it in
/// [`Error`] when an error trait object is required.
///
/// # Examples
///
/// ```
/// use freshet::ErrorInfo;
///
/// let info = ErrorInfo::msg("backend returned 503");
/// assert_eq!(info.message(), "backend returned 503");
/// assert!(info.cause().is_none());
///
/// let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
/// let info = ErrorInfo::from(io);
/// assert_eq!(info.message(), "timed out");
/// assert!(info.cause().is_some());
/// ```
#[derive(Clone)]
pub struct ErrorInfo {
    message: Arc<str>,
    cause: Option<Cause>,
}

impl ErrorInfo {
    /// Creates an error from a message, without an underlying cause.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
            cause: None,
        }
    }

    /// Creates an error with a message and an underlying cause.
    pub fn with_cause(message: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: Arc::from(message.into()),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Returns the human readable failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the underlying cause, if one was captured.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Attempts to downcast the underlying cause to a concrete error type.
    #[must_use]
    pub fn cause_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.cause.as_deref().and_then(|cause| cause.downcast_ref::<E>())
    }
}

impl<E> From<E> for ErrorInfo
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            message: Arc::from(error.to_string()),
            cause: Some(Arc::new(error)),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorInfo")
            .field("message", &self.message)
            .field("cause", &self.cause)
            .finish()
    }
}

impl PartialEq for ErrorInfo {
    /// Two errors are equal when their messages match and they either share the
    /// same cause allocation or both have none.
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && match (&self.cause, &other.cause) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

/// An error returned by cache operations that report failure directly.
///
/// Only [`FetchCache::force_refresh`](crate::FetchCache::force_refresh),
/// [`FetchCache::mutate`](crate::FetchCache::mutate), the refresh operations of
/// [`CachedResource`](crate::CachedResource) and key construction return this
/// type. Passive reads observe failures through
/// [`Snapshot::last_error`](crate::Snapshot::last_error) instead.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The fetcher for `key` failed.
    #[error("fetch for `{key}` failed: {info}")]
    Fetch {
        /// The resource that was being fetched.
        key: ResourceKey,
        /// What the fetcher reported.
        info: ErrorInfo,
    },

    /// The write issued by a mutation for `key` failed and the optimistic
    /// value was rolled back.
    #[error("write for `{key}` failed: {info}")]
    Write {
        /// The resource that was being written.
        key: ResourceKey,
        /// What the write function reported.
        info: ErrorInfo,
    },

    /// A resource key could not be constructed.
    #[error("invalid resource key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: &'static str,
    },
}

impl Error {
    /// Returns the fetch or write failure details, if this error carries any.
    #[must_use]
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Fetch { info, .. } | Self::Write { info, .. } => Some(info),
            Self::InvalidKey { .. } => None,
        }
    }

    /// Returns the key the failing operation targeted, if any.
    #[must_use]
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            Self::Fetch { key, .. } | Self::Write { key, .. } => Some(key),
            Self::InvalidKey { .. } => None,
        }
    }
}

/// A specialized [`Result`] type for fetch cache operations.
pub type Result<T> = std::result::Result<T, Error>;
