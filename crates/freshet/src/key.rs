// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Logical resource keys.

use std::{borrow::Borrow, fmt, sync::Arc};

use crate::Error;

const SEPARATOR: char = ':';

/// Identifies one logical cached query.
///
/// Keys follow the `"<resource>:<scope>:<param>..."` convention so that two
/// call sites asking for the same data always land on the same cache entry,
/// for example `"dashboard-summary:ws-42:30d"`. The key is validated once at
/// construction and is immutable afterwards; cloning shares the underlying
/// string.
///
/// # Examples
///
/// ```
/// use freshet::ResourceKey;
///
/// let key = ResourceKey::compose("dashboard-summary", "ws-42", ["30d"])?;
/// assert_eq!(key.as_str(), "dashboard-summary:ws-42:30d");
/// assert_eq!(key.resource(), "dashboard-summary");
///
/// let same = ResourceKey::new("dashboard-summary:ws-42:30d")?;
/// assert_eq!(key, same);
/// # Ok::<(), freshet::Error>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Creates a key from an already formatted string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if `key` is empty or only whitespace.
    pub fn new(key: impl AsRef<str>) -> Result<Self, Error> {
        let key = key.as_ref();
        if key.trim().is_empty() {
            return Err(Error::InvalidKey {
                reason: "key must not be empty",
            });
        }
        Ok(Self(Arc::from(key)))
    }

    /// Builds a key from a resource name, a scope and additional parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if any segment is empty or contains the
    /// `:` separator, since either would make distinct queries collide.
    pub fn compose<I, P>(resource: &str, scope: &str, params: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        validate_segment(resource)?;
        validate_segment(scope)?;

        let mut key = String::with_capacity(resource.len() + scope.len() + 1);
        key.push_str(resource);
        key.push(SEPARATOR);
        key.push_str(scope);

        for param in params {
            let param = param.as_ref();
            validate_segment(param)?;
            key.push(SEPARATOR);
            key.push_str(param);
        }

        Ok(Self(Arc::from(key)))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the resource name, the part before the first separator.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }
}

fn validate_segment(segment: &str) -> Result<(), Error> {
    if segment.is_empty() {
        return Err(Error::InvalidKey {
            reason: "key segments must not be empty",
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(Error::InvalidKey {
            reason: "key segments must not contain ':'",
        });
    }
    Ok(())
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceKey").field(&&*self.0).finish()
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ResourceKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
