//! Time and eviction-observation seam.
//!
//! The authority reads "now" and reports actor terminations through an
//! [`Engine`], so the eviction schedule can be driven deterministically in
//! tests. Production code uses [`SystemEngine`].

use crate::types::{Timestamp, Uid};

use tracing::debug;

/// Injectable clock plus eviction observer.
#[async_trait::async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Timestamp;

    /// Called exactly once for every user actor that terminates.
    fn evicted(&self, uid: &Uid);

    /// Resolves when the authority loop should wake up and sweep.
    ///
    /// Tests use this to single-step the supervisor after moving the clock.
    /// The default never resolves.
    async fn poked(&self) {
        std::future::pending::<()>().await;
    }
}

/// Wall-clock engine used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEngine;

#[async_trait::async_trait]
impl Engine for SystemEngine {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }

    fn evicted(&self, uid: &Uid) {
        debug!(target: "ca.engine", uid = %uid, "User evicted from cache");
    }
}
