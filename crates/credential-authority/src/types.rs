//! Identity data types shared across the credential authority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point in time as reported by an [`Engine`](crate::engine::Engine).
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Hex form of the well-known public UID.
///
/// Batch existence checks skip this UID without touching the identity source.
/// A single-user check on it is fetched like any other UID.
pub const PUBLIC_UID: &str = "ffffffffffffffffffffffffffffff00";

/// Stable, opaque user identifier. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// The public sentinel UID.
    #[must_use]
    pub fn public() -> Self {
        Self(PUBLIC_UID.to_string())
    }

    /// Whether this is the public sentinel UID.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_UID
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self::new(uid)
    }
}

/// A normalized username.
///
/// Normalization trims surrounding whitespace and lowercases, so two
/// usernames compare equal whenever they name the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Username(String);

impl Username {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Username {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Username {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

/// Opaque identifier of a key bound to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kid(String);

impl Kid {
    #[must_use]
    pub fn new(kid: impl Into<String>) -> Self {
        Self(kid.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kid {
    fn from(kid: &str) -> Self {
        Self::new(kid)
    }
}
