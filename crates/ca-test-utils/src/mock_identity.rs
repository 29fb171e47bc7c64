//! In-memory identity source for credential authority testing.
//!
//! Provides a [`UserKeyApi`] implementation backed by a user map:
//! - Per-UID fetch counting
//! - Switchable failure modes (unavailable, hang until cancelled)
//! - Scripted change batches for the poll loop
//!
//! # Example
//!
//! ```rust,ignore
//! use ca_test_utils::{MockUserKeyApi, TestUser};
//!
//! let alice = TestUser::new("alice").with_sibkey("kid-1");
//! let api = MockUserKeyApi::new().with_user(&alice);
//!
//! // Simulate a key revocation upstream
//! api.set_user(&alice.clone().revoked("kid-1"));
//! api.push_changes(vec![alice.uid.clone()]);
//! ```

use crate::fixtures::TestUser;

use async_trait::async_trait;
use credential_authority::{IdentityError, Uid, UserKeyApi, UserRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How `get_user` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Serve from the user map.
    #[default]
    Normal,
    /// Fail every fetch with `Unavailable`.
    Unavailable,
    /// Block until the caller's token is cancelled.
    Hang,
}

/// Mock identity source for testing the credential authority.
#[derive(Debug, Clone)]
pub struct MockUserKeyApi {
    inner: Arc<Mutex<MockInner>>,
    changes_tx: mpsc::UnboundedSender<Vec<Uid>>,
    changes_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<Uid>>>>,
}

#[derive(Debug, Default)]
struct MockInner {
    users: HashMap<Uid, UserRecord>,
    /// `get_user` calls per UID
    fetches: HashMap<Uid, usize>,
    mode: FetchMode,
    polls: usize,
}

impl Default for MockUserKeyApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUserKeyApi {
    /// Create a new, empty identity source.
    #[must_use]
    pub fn new() -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
            changes_tx,
            changes_rx: Arc::new(tokio::sync::Mutex::new(changes_rx)),
        }
    }

    /// Add a user to the mock.
    #[must_use]
    pub fn with_user(self, user: &TestUser) -> Self {
        self.set_user(user);
        self
    }

    /// This mock as the trait object the authority takes.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn UserKeyApi> {
        Arc::new(self.clone())
    }

    /// Insert or replace a user. Does not notify the poll loop.
    pub fn set_user(&self, user: &TestUser) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(user.uid.clone(), user.record());
    }

    /// Remove a user so later fetches report `NotFound`.
    pub fn remove_user(&self, uid: &Uid) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.remove(uid);
    }

    pub fn set_mode(&self, mode: FetchMode) {
        self.inner.lock().unwrap().mode = mode;
    }

    /// Queue a batch of changed UIDs for the next `poll_for_changes`.
    pub fn push_changes(&self, uids: Vec<Uid>) {
        self.changes_tx.send(uids).unwrap();
    }

    /// Number of `get_user` calls made for `uid`.
    #[must_use]
    pub fn fetch_count(&self, uid: &Uid) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.fetches.get(uid).copied().unwrap_or(0)
    }

    /// Number of `get_user` calls across all users.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.fetches.values().sum()
    }

    /// Number of `poll_for_changes` calls started.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.inner.lock().unwrap().polls
    }
}

#[async_trait]
impl UserKeyApi for MockUserKeyApi {
    async fn get_user(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
    ) -> Result<UserRecord, IdentityError> {
        let (mode, record) = {
            let mut inner = self.inner.lock().unwrap();
            *inner.fetches.entry(uid.clone()).or_insert(0) += 1;
            (inner.mode, inner.users.get(uid).cloned())
        };

        match mode {
            FetchMode::Normal => record.ok_or_else(|| IdentityError::NotFound(uid.clone())),
            FetchMode::Unavailable => {
                Err(IdentityError::Unavailable("mock identity source down".to_string()))
            }
            FetchMode::Hang => {
                cancel.cancelled().await;
                Err(IdentityError::Canceled)
            }
        }
    }

    async fn poll_for_changes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Uid>, IdentityError> {
        self.inner.lock().unwrap().polls += 1;

        let mut changes = self.changes_rx.lock().await;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IdentityError::Canceled),
            batch = changes.recv() => Ok(batch.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_user_counts_fetches() {
        let alice = TestUser::new("alice").with_sibkey("kid-1");
        let api = MockUserKeyApi::new().with_user(&alice);
        let token = CancellationToken::new();

        let record = api.get_user(&token, &alice.uid).await.unwrap();
        assert_eq!(record, alice.record());
        assert_eq!(api.fetch_count(&alice.uid), 1);

        let missing = Uid::new("missing");
        let err = api.get_user(&token, &missing).await.unwrap_err();
        assert_eq!(err, IdentityError::NotFound(missing.clone()));
        assert_eq!(api.total_fetches(), 2);
    }

    #[tokio::test]
    async fn test_hang_mode_honors_cancel() {
        let alice = TestUser::new("alice");
        let api = MockUserKeyApi::new().with_user(&alice);
        api.set_mode(FetchMode::Hang);

        let token = CancellationToken::new();
        token.cancel();

        let err = api.get_user(&token, &alice.uid).await.unwrap_err();
        assert_eq!(err, IdentityError::Canceled);
    }

    #[tokio::test]
    async fn test_poll_returns_pushed_batches() {
        let api = MockUserKeyApi::new();
        let token = CancellationToken::new();

        api.push_changes(vec![Uid::new("u1")]);
        let batch = api.poll_for_changes(&token).await.unwrap();
        assert_eq!(batch, vec![Uid::new("u1")]);

        token.cancel();
        let err = api.poll_for_changes(&token).await.unwrap_err();
        assert_eq!(err, IdentityError::Canceled);
        assert_eq!(api.poll_count(), 2);
    }
}
