//! Observability for the credential authority.
//!
//! Logging uses `tracing` with `ca.*` targets. Actor run loops are wrapped in
//! `#[instrument(skip_all)]` spans with explicit safe fields (uid, authority id);
//! usernames and key IDs only appear in debug-level events.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ca_cached_users` | Gauge | none | Live user actors |
//! | `ca_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `ca_user_fetch_total` | Counter | `status` | Identity-source fetches |
//! | `ca_user_fetch_duration_seconds` | Histogram | `status` | Fetch latency |
//! | `ca_checks_total` | Counter | `result` | Check outcomes |
//! | `ca_evictions_total` | Counter | `reason` | Cache removals |
//! | `ca_poll_total` | Counter | `status` | Change polls |
//! | `ca_actor_panics_total` | Counter | `actor_type` | Actor bugs |

pub mod metrics;

pub use metrics::{
    record_actor_panic, record_check, record_eviction, record_poll, record_user_fetch,
    set_actor_mailbox_depth, set_cached_users,
};
