//! Integration tests for the credential authority cache lifecycle.
//!
//! Drives a full `CredentialAuthority` with a mock identity source and a
//! manual clock: snapshot freshness, idle eviction, invalidation from the
//! change feed, and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ca_test_utils::{
    init_test_tracing, test_config, FetchMode, ManualEngine, MockUserKeyApi, TestUser,
    EVICTION_WAIT, TEST_FRESHNESS, TEST_RETENTION,
};
use credential_authority::{CaError, Config, CredentialAuthority, Kid, Uid, Username};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    ca: CredentialAuthority,
    api: MockUserKeyApi,
    engine: Arc<ManualEngine>,
    cancel: CancellationToken,
}

impl Harness {
    fn start(users: &[&TestUser]) -> Self {
        init_test_tracing();

        let api = MockUserKeyApi::new();
        for user in users {
            api.set_user(user);
        }
        let engine = ManualEngine::new();
        let ca = CredentialAuthority::with_engine(api.shared(), engine.clone(), &test_config());

        Self {
            ca,
            api,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    async fn check(&self, user: &TestUser) -> Result<(), CaError> {
        self.ca
            .check_user_key(&self.cancel, &user.uid, Some(&user.username), None)
            .await
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test]
async fn test_repeat_checks_within_freshness_fetch_once() {
    let alice = TestUser::new("alice").with_sibkey("kid-1");
    let h = Harness::start(&[&alice]);

    for _ in 0..3 {
        h.check(&alice).await.unwrap();
    }
    assert_eq!(h.api.fetch_count(&alice.uid), 1);

    // Exactly at the freshness boundary the snapshot is still trusted
    h.engine.advance(TEST_FRESHNESS);
    h.check(&alice).await.unwrap();
    assert_eq!(h.api.fetch_count(&alice.uid), 1);

    h.engine.advance(Duration::from_secs(1));
    h.check(&alice).await.unwrap();
    assert_eq!(h.api.fetch_count(&alice.uid), 2);
    assert_eq!(h.ca.fetch_count(), 2);

    h.ca.shutdown();
}

#[tokio::test]
async fn test_concurrent_first_checks_share_one_fetch() {
    let alice = TestUser::new("alice");
    let h = Harness::start(&[&alice]);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let ca = h.ca.clone();
        let uid = alice.uid.clone();
        let cancel = h.cancel.clone();
        tasks.push(tokio::spawn(async move {
            ca.check_user_key(&cancel, &uid, None, None).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.api.fetch_count(&alice.uid), 1);
    h.ca.shutdown();
}

#[tokio::test]
async fn test_upstream_failure_is_not_cached() {
    let alice = TestUser::new("alice");
    let h = Harness::start(&[&alice]);

    h.api.set_mode(FetchMode::Unavailable);
    let err = h.check(&alice).await.unwrap_err();
    assert!(matches!(err, CaError::Upstream(_)), "got {err:?}");
    assert!(!err.is_rejection());

    h.api.set_mode(FetchMode::Normal);
    h.check(&alice).await.unwrap();
    assert_eq!(h.api.fetch_count(&alice.uid), 2);

    h.ca.shutdown();
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test]
async fn test_idle_user_evicted_after_retention() {
    let alice = TestUser::new("alice");
    let h = Harness::start(&[&alice]);

    h.check(&alice).await.unwrap();

    // At the retention boundary the user is kept
    h.engine.advance(TEST_RETENTION);
    assert_eq!(h.engine.settle().await, 0);

    h.engine.advance(Duration::from_secs(1));
    assert!(h.engine.wait_for_evictions(1, EVICTION_WAIT).await);
    assert_eq!(h.engine.evicted_uids(), vec![alice.uid.clone()]);

    let status = h.ca.status().await.unwrap();
    assert_eq!(status.cached_users, 0);

    // A later check starts from scratch
    h.check(&alice).await.unwrap();
    assert_eq!(h.api.fetch_count(&alice.uid), 2);

    h.ca.shutdown();
}

#[tokio::test]
async fn test_user_checked_every_freshness_window_survives() {
    let alice = TestUser::new("alice");
    let h = Harness::start(&[&alice]);

    for _ in 0..6 {
        h.check(&alice).await.unwrap();
        h.engine.advance(TEST_FRESHNESS);
        h.engine.settle().await;
    }

    assert_eq!(h.engine.evicted_count(), 0);
    // Fetched at 0, 10 and 20 minutes; 5, 15 and 25 were still fresh
    assert_eq!(h.api.fetch_count(&alice.uid), 3);

    h.ca.shutdown();
}

#[tokio::test]
async fn test_eviction_only_takes_idle_users() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let h = Harness::start(&[&alice, &bob]);

    h.check(&alice).await.unwrap();
    h.check(&bob).await.unwrap();

    h.engine.advance(Duration::from_secs(6 * 60));
    h.check(&bob).await.unwrap();

    h.engine.advance(Duration::from_secs(3 * 60));
    assert!(h.engine.wait_for_evictions(1, EVICTION_WAIT).await);
    assert_eq!(h.engine.settle().await, 1);
    assert_eq!(h.engine.evicted_uids(), vec![alice.uid.clone()]);

    let status = h.ca.status().await.unwrap();
    assert_eq!(status.cached_users, 1);

    h.ca.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_evicts_without_traffic() {
    init_test_tracing();
    let alice = TestUser::new("alice");
    let api = MockUserKeyApi::new().with_user(&alice);
    let engine = ManualEngine::new();
    let config = Config {
        sweep_interval: Duration::from_secs(60),
        ..test_config()
    };
    let ca = CredentialAuthority::with_engine(api.shared(), engine.clone(), &config);
    let cancel = CancellationToken::new();

    ca.check_user_key(&cancel, &alice.uid, None, None)
        .await
        .unwrap();
    while ca.status().await.unwrap().pending_tickets == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Move past retention but never poke; only the sweep timer can act
    engine.advance(TEST_RETENTION + Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(engine.evicted_count(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    for _ in 0..10 {
        if engine.evicted_count() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(engine.evicted_uids(), vec![alice.uid.clone()]);
    assert_eq!(ca.status().await.unwrap().cached_users, 0);

    ca.shutdown();
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_change_feed_forces_refetch() {
    let alice = TestUser::new("alice").with_sibkey("kid-1").with_subkey("kid-2");
    let h = Harness::start(&[&alice]);

    h.ca.check_user_key(&h.cancel, &alice.uid, None, Some(&Kid::new("kid-2")))
        .await
        .unwrap();

    // Rename and revoke upstream, then announce the change
    let changed = alice.clone().renamed("alicia").revoked("kid-2");
    h.api.set_user(&changed);
    h.api.push_changes(vec![alice.uid.clone()]);

    assert!(h.engine.wait_for_evictions(1, EVICTION_WAIT).await);

    let err = h.check(&alice).await.unwrap_err();
    assert!(
        matches!(&err, CaError::BadUsername { expected, received }
            if *expected == Username::new("alicia") && *received == Username::new("alice")),
        "got {err:?}"
    );
    h.check(&changed).await.unwrap();

    let err = h
        .ca
        .check_user_key(&h.cancel, &alice.uid, None, Some(&Kid::new("kid-2")))
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadKey { .. }), "got {err:?}");

    assert_eq!(h.api.fetch_count(&alice.uid), 2);
    h.ca.shutdown();
}

#[tokio::test]
async fn test_change_for_uncached_user_is_ignored() {
    let alice = TestUser::new("alice");
    let h = Harness::start(&[&alice]);

    h.api.push_changes(vec![Uid::new("never-seen")]);
    wait_until(|| h.api.poll_count() >= 2).await;

    h.check(&alice).await.unwrap();
    assert_eq!(h.engine.settle().await, 0);

    h.ca.shutdown();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_evicts_every_actor_once() {
    let users: Vec<TestUser> = ["u1", "u2", "u3"]
        .iter()
        .map(|name| TestUser::new(name))
        .collect();
    let hanging = TestUser::new("hanging");
    let mut all: Vec<&TestUser> = users.iter().collect();
    all.push(&hanging);
    let h = Harness::start(&all);

    for user in &users {
        h.check(user).await.unwrap();
    }

    // Leave one check stuck in its fetch
    h.api.set_mode(FetchMode::Hang);
    let in_flight = {
        let ca = h.ca.clone();
        let uid = hanging.uid.clone();
        let cancel = h.cancel.clone();
        tokio::spawn(async move { ca.check_user_key(&cancel, &uid, None, None).await })
    };
    wait_until(|| h.api.fetch_count(&hanging.uid) == 1).await;

    h.ca.shutdown();
    assert!(h.ca.is_shut_down());

    let result = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(CaError::Shutdown)), "got {result:?}");

    assert!(h.engine.wait_for_evictions(4, EVICTION_WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut evicted = h.engine.evicted_uids();
    evicted.sort();
    let mut expected: Vec<Uid> = all.iter().map(|user| user.uid.clone()).collect();
    expected.sort();
    assert_eq!(evicted, expected);

    // Nothing is fetched or answered after shutdown
    let err = h.check(users.first().unwrap()).await.unwrap_err();
    assert!(matches!(err, CaError::Shutdown), "got {err:?}");

    // Idempotent
    h.ca.shutdown();
}

#[tokio::test]
async fn test_shutdown_with_empty_cache() {
    let h = Harness::start(&[]);

    h.ca.shutdown();
    h.ca.shutdown();

    assert_eq!(h.engine.settle().await, 0);
    assert!(matches!(h.ca.status().await, Err(CaError::Shutdown)));
}
