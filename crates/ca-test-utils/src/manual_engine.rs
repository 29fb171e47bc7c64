//! Hand-driven [`Engine`] for deterministic eviction tests.
//!
//! The clock only moves when a test calls [`ManualEngine::advance`]. Every
//! actor termination is recorded, and [`ManualEngine::poke`] wakes the
//! authority loop so it sweeps against the new time.

use async_trait::async_trait;
use chrono::TimeZone;
use credential_authority::{Engine, Timestamp, Uid};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Default time to wait for an expected eviction.
pub const EVICTION_WAIT: Duration = Duration::from_secs(5);

/// Manual clock plus eviction recorder.
#[derive(Debug)]
pub struct ManualEngine {
    now: Mutex<Timestamp>,
    evicted: Mutex<Vec<Uid>>,
    poke: Notify,
}

impl ManualEngine {
    /// Create an engine whose clock starts at 2024-01-01T00:00:00Z.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let start = chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap();
        Arc::new(Self {
            now: Mutex::new(start),
            evicted: Mutex::new(Vec::new()),
            poke: Notify::new(),
        })
    }

    /// Move the clock forward. Does not wake the authority.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::TimeDelta::from_std(by).unwrap();
    }

    /// Wake the authority loop once.
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    /// UIDs reported evicted, in order.
    #[must_use]
    pub fn evicted_uids(&self) -> Vec<Uid> {
        self.evicted.lock().unwrap().clone()
    }

    #[must_use]
    pub fn evicted_count(&self) -> usize {
        self.evicted.lock().unwrap().len()
    }

    /// Poke the authority until at least `count` evictions have been
    /// reported. Returns false if `timeout` elapses first.
    pub async fn wait_for_evictions(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evicted_count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            self.poke();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Give the authority a few turns to act, then report evictions so far.
    ///
    /// Used to assert that something was NOT evicted.
    pub async fn settle(&self) -> usize {
        for _ in 0..5 {
            self.poke();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.evicted_count()
    }
}

#[async_trait]
impl Engine for ManualEngine {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }

    fn evicted(&self, uid: &Uid) {
        self.evicted.lock().unwrap().push(uid.clone());
    }

    async fn poked(&self) {
        self.poke.notified().await;
    }
}
