//! Identity source abstraction.
//!
//! The credential authority never talks to the remote identity service
//! directly. It consumes a [`UserKeyApi`] implementation, which the embedding
//! service provides (HTTP client, gRPC client, in-memory fake, ...).

use crate::types::{Kid, Uid, Username};

use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Current truth about one user, as reported by the identity source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Current username.
    pub username: Username,
    /// Active sibling (device) keys.
    pub sibkeys: HashSet<Kid>,
    /// Active subkeys.
    pub subkeys: HashSet<Kid>,
    /// Whether the account has been deleted.
    pub is_deleted: bool,
}

impl UserRecord {
    /// Whether `kid` is an active sibkey or subkey.
    #[must_use]
    pub fn has_key(&self, kid: &Kid) -> bool {
        self.sibkeys.contains(kid) || self.subkeys.contains(kid)
    }
}

/// Errors reported by an identity source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The identity source does not know this user.
    #[error("User not found: {0}")]
    NotFound(Uid),

    /// The call was abandoned because its cancellation token fired.
    #[error("Identity request canceled")]
    Canceled,

    /// The identity source could not be reached or answered with an error.
    #[error("Identity source unavailable: {0}")]
    Unavailable(String),

    /// The identity source answered with something we could not interpret.
    #[error("Malformed identity response: {0}")]
    Malformed(String),
}

/// Capability to read users and key changes from the identity source.
///
/// Implementations must honor `cancel`: once it fires, the pending call should
/// return [`IdentityError::Canceled`] promptly instead of blocking.
#[async_trait::async_trait]
pub trait UserKeyApi: Send + Sync {
    /// Fetch the current username and key sets for `uid`.
    async fn get_user(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
    ) -> Result<UserRecord, IdentityError>;

    /// Wait for and return the UIDs whose keys or username changed since the
    /// previous call. Sync cursor state is private to the implementation.
    async fn poll_for_changes(&self, cancel: &CancellationToken)
        -> Result<Vec<Uid>, IdentityError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_has_key_checks_both_sets() {
        let record = UserRecord {
            username: Username::new("alice"),
            sibkeys: HashSet::from([Kid::new("sib-1")]),
            subkeys: HashSet::from([Kid::new("sub-1")]),
            is_deleted: false,
        };

        assert!(record.has_key(&Kid::new("sib-1")));
        assert!(record.has_key(&Kid::new("sub-1")));
        assert!(!record.has_key(&Kid::new("other")));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            IdentityError::NotFound(Uid::new("abc")).to_string(),
            "User not found: abc"
        );
        assert_eq!(
            IdentityError::Unavailable("503".to_string()).to_string(),
            "Identity source unavailable: 503"
        );
    }
}
