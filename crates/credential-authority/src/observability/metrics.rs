//! Metrics definitions for the credential authority.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ca_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! The crate only records through the `metrics` facade; the embedding service
//! decides which recorder/exporter to install.
//!
//! # Cardinality
//!
//! Labels are bounded; UIDs and key IDs are never used as label values:
//! - `actor_type`: 3 values (authority, user, poller)
//! - `status`: success, error, canceled
//! - `result`: ok, rejected, error
//! - `reason`: sweep, invalidated, shutdown, failed

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Set the number of cached users (live user actors).
///
/// Metric: `ca_cached_users`
pub fn set_cached_users(count: usize) {
    // usize to f64 conversion is safe for realistic cache sizes (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("ca_cached_users").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `ca_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ca_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record an identity-source fetch of one user.
///
/// Metrics: `ca_user_fetch_total`, `ca_user_fetch_duration_seconds`
/// Labels: `status`
pub fn record_user_fetch(status: &str, duration: Duration) {
    counter!("ca_user_fetch_total", "status" => status.to_string()).increment(1);
    histogram!("ca_user_fetch_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Record the outcome of one check answered by a user actor.
///
/// Metric: `ca_checks_total`
/// Labels: `result`
pub fn record_check(result: &str) {
    counter!("ca_checks_total", "result" => result.to_string()).increment(1);
}

/// Record a user actor being removed from the cache.
///
/// Metric: `ca_evictions_total`
/// Labels: `reason`
pub fn record_eviction(reason: &str) {
    counter!("ca_evictions_total", "reason" => reason.to_string()).increment(1);
}

/// Record one change poll and how many users it invalidated.
///
/// Metrics: `ca_poll_total`, `ca_poll_changed_users_total`
/// Labels: `status`
pub fn record_poll(status: &str, changed: usize) {
    counter!("ca_poll_total", "status" => status.to_string()).increment(1);
    counter!("ca_poll_changed_users_total").increment(changed as u64);
}

/// Record an actor panic.
///
/// Metric: `ca_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("ca_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These record to the global no-op recorder when none is installed.

    #[test]
    fn test_record_functions_without_recorder() {
        set_cached_users(0);
        set_cached_users(10_000);
        set_actor_mailbox_depth("authority", 3);
        record_user_fetch("success", Duration::from_millis(40));
        record_user_fetch("error", Duration::from_millis(900));
        record_check("ok");
        record_check("rejected");
        record_eviction("sweep");
        record_eviction("invalidated");
        record_poll("success", 2);
        record_actor_panic("user");
    }

    #[test]
    fn test_metrics_are_captured_by_local_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_check("ok");
            record_check("ok");
            record_eviction("shutdown");
            set_cached_users(7);
        });

        let snapshot = snapshotter.snapshot().into_vec();

        let checks = snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "ca_checks_total"
                    && key.key().labels().any(|l| l.value() == "ok")
            })
            .map(|(_, _, _, value)| value);
        assert_eq!(checks, Some(&DebugValue::Counter(2)));

        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "ca_evictions_total"));
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "ca_cached_users"));
    }
}
