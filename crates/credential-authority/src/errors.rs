//! Credential authority error types.
//!
//! Errors split into *rejections* (the identity triple is definitively not
//! valid right now) and transient failures (the answer is unknown; callers may
//! retry). Upstream details are kept for logs but not exposed to clients.

use crate::identity::IdentityError;
use crate::types::{Kid, Uid, Username};

use thiserror::Error;

/// Credential authority error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// The authority is shutting down.
    #[error("Credential authority is shutting down")]
    Shutdown,

    /// The caller's cancellation token fired while waiting.
    #[error("Request canceled")]
    Canceled,

    /// The identity source failed to produce the user.
    #[error("Identity source error: {0}")]
    Upstream(#[from] IdentityError),

    /// The requested username does not match the current one.
    #[error("Bad username: wanted {expected}, got {received}")]
    BadUsername {
        expected: Username,
        received: Username,
    },

    /// The requested key is not an active key of the user.
    #[error("Key {kid} is not active for user {uid}")]
    BadKey { uid: Uid, kid: Kid },

    /// The caller's key sets differ from the user's active key sets.
    #[error("Key sets do not match for user {uid}")]
    KeysNotEqual { uid: Uid },

    /// The user's account has been deleted.
    #[error("User {uid} is deleted")]
    UserDeleted { uid: Uid },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaError {
    /// Whether this error means the credentials are definitively invalid,
    /// as opposed to the answer being unavailable.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            CaError::BadUsername { .. }
            | CaError::BadKey { .. }
            | CaError::KeysNotEqual { .. }
            | CaError::UserDeleted { .. }
            | CaError::Upstream(IdentityError::NotFound(_)) => true,
            CaError::Shutdown
            | CaError::Canceled
            | CaError::Upstream(_)
            | CaError::Internal(_) => false,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CaError::Shutdown => "Service is shutting down, please retry".to_string(),
            CaError::Canceled => "Request canceled".to_string(),
            CaError::Upstream(IdentityError::NotFound(_)) => "User not found".to_string(),
            CaError::Upstream(_) | CaError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            CaError::BadUsername { .. } => "Username does not match".to_string(),
            CaError::BadKey { .. } | CaError::KeysNotEqual { .. } => {
                "Key is not valid for this user".to_string()
            }
            CaError::UserDeleted { .. } => "User has been deleted".to_string(),
        }
    }
}
