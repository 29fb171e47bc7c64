//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::CaError;
use crate::types::{Kid, Timestamp, Uid, Username};

use std::collections::HashSet;
use tokio::sync::oneshot;

/// Messages sent to the `AuthorityActor`.
#[derive(Debug)]
pub enum AuthorityMessage {
    /// Route a check to the user's actor, spawning it if needed.
    Check(CheckRequest),

    /// The identity source reported a change for this user; drop its actor.
    Invalidate { uid: Uid },

    /// Get current status (for health checks and tests).
    GetStatus {
        /// Response channel for authority status.
        respond_to: oneshot::Sender<AuthorityStatus>,
    },
}

/// Messages sent to a `UserActor`.
#[derive(Debug)]
pub enum UserMessage {
    /// Validate constraints against the user's snapshot.
    Check(CheckRequest),
}

/// A one-shot check of a user's identity.
#[derive(Debug)]
pub struct CheckRequest {
    pub uid: Uid,
    pub constraints: CheckConstraints,
    /// Response channel for the check result.
    pub respond_to: oneshot::Sender<Result<(), CaError>>,
}

/// What a check asserts about a user. Absent fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckConstraints {
    /// Expected (normalized) username.
    pub username: Option<Username>,
    /// Key that must be one of the user's active keys.
    pub kid: Option<Kid>,
    /// Key sets that must equal the user's active key sets exactly.
    pub expected_keys: Option<KeySets>,
    /// Whether a deleted account still passes.
    pub allow_deleted: bool,
}

/// A user's sibkey and subkey sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySets {
    pub sibkeys: HashSet<Kid>,
    pub subkeys: HashSet<Kid>,
}

impl KeySets {
    #[must_use]
    pub fn new(
        sibkeys: impl IntoIterator<Item = Kid>,
        subkeys: impl IntoIterator<Item = Kid>,
    ) -> Self {
        Self {
            sibkeys: sibkeys.into_iter().collect(),
            subkeys: subkeys.into_iter().collect(),
        }
    }
}

/// Deferred instruction to reconsider evicting `uid`, cut once per fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionTicket {
    pub uid: Uid,
    pub scheduled_at: Timestamp,
}

/// Status of the `AuthorityActor`.
#[derive(Debug, Clone)]
pub struct AuthorityStatus {
    /// Users currently cached (live user actors).
    pub cached_users: usize,
    /// Eviction tickets waiting for review.
    pub pending_tickets: usize,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
    /// Deepest mailbox backlog seen since start.
    pub peak_mailbox_depth: usize,
}
