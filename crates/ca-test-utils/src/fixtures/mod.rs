//! Pre-configured test data fixtures for credential authority testing.
//!
//! Provides builders for:
//! - Users with sibkeys, subkeys and deletion state
//! - Authority configs with short, known timings

use credential_authority::{Config, Kid, Uid, UserRecord, Username};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Snapshot freshness used by [`test_config`].
pub const TEST_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// Cache retention used by [`test_config`].
pub const TEST_RETENTION: Duration = Duration::from_secs(8 * 60);

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub uid: Uid,
    pub username: Username,
    pub sibkeys: HashSet<Kid>,
    pub subkeys: HashSet<Kid>,
    pub is_deleted: bool,
}

impl TestUser {
    /// Create a test user with a random UID and no keys.
    #[must_use]
    pub fn new(username: &str) -> Self {
        Self::with_uid(&Uuid::new_v4().simple().to_string(), username)
    }

    /// Create a test user with a fixed UID.
    #[must_use]
    pub fn with_uid(uid: &str, username: &str) -> Self {
        Self {
            uid: Uid::new(uid),
            username: Username::new(username),
            sibkeys: HashSet::new(),
            subkeys: HashSet::new(),
            is_deleted: false,
        }
    }

    #[must_use]
    pub fn with_sibkey(mut self, kid: &str) -> Self {
        self.sibkeys.insert(Kid::new(kid));
        self
    }

    #[must_use]
    pub fn with_subkey(mut self, kid: &str) -> Self {
        self.subkeys.insert(Kid::new(kid));
        self
    }

    /// Mark the account as deleted.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Rename the user, as after a username change upstream.
    #[must_use]
    pub fn renamed(mut self, username: &str) -> Self {
        self.username = Username::new(username);
        self
    }

    /// Drop a key, as after a revocation upstream.
    #[must_use]
    pub fn revoked(mut self, kid: &str) -> Self {
        let kid = Kid::new(kid);
        self.sibkeys.remove(&kid);
        self.subkeys.remove(&kid);
        self
    }

    /// The record the identity source returns for this user.
    #[must_use]
    pub fn record(&self) -> UserRecord {
        UserRecord {
            username: self.username.clone(),
            sibkeys: self.sibkeys.clone(),
            subkeys: self.subkeys.clone(),
            is_deleted: self.is_deleted,
        }
    }
}

/// Authority config with the reference cache timings, fast change polling,
/// and a background sweep slow enough that tests drive every sweep.
#[must_use]
pub fn test_config() -> Config {
    Config {
        authority_id: "ca-test".to_string(),
        user_freshness: TEST_FRESHNESS,
        cache_retention: TEST_RETENTION,
        poll_interval: Duration::from_millis(10),
        poll_backoff_base: Duration::from_millis(10),
        poll_backoff_max: Duration::from_millis(100),
        sweep_interval: Duration::from_secs(3600),
    }
}
