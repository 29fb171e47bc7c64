//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with per-actor-type thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Authority  | < 100  | 100-500 | > 500    |
//! | User       | < 10   | 10-50   | > 50     |
//!
//! A deep user mailbox means many callers are queued behind one slow fetch.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the authority actor.
pub const AUTHORITY_MAILBOX_NORMAL: usize = 100;
pub const AUTHORITY_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for user actors.
pub const USER_MAILBOX_NORMAL: usize = 10;
pub const USER_MAILBOX_WARNING: usize = 50;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// AuthorityActor (one per authority instance).
    Authority,
    /// UserActor (one per cached user).
    User,
    /// Change poll loop.
    Poller,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Authority => "authority",
            ActorType::User => "user",
            ActorType::Poller => "poller",
        }
    }

    /// Returns `(normal, warning)` mailbox thresholds, or `None` for actors
    /// without a mailbox.
    #[must_use]
    pub const fn mailbox_thresholds(&self) -> Option<(usize, usize)> {
        match self {
            ActorType::Authority => Some((AUTHORITY_MAILBOX_NORMAL, AUTHORITY_MAILBOX_WARNING)),
            ActorType::User => Some((USER_MAILBOX_NORMAL, USER_MAILBOX_WARNING)),
            ActorType::Poller => None,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// At or below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks the observed queue depth of one actor's mailbox.
///
/// The owning actor calls [`observe`](Self::observe) with the receiver's
/// backlog each time it dequeues a message.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Actor identifier (authority id or uid).
    actor_id: String,
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record the backlog left in the mailbox after a dequeue.
    pub fn observe(&self, depth: usize) {
        let previous = self.depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        let level = self.level_for_depth(depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "ca.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && self.level_for_depth(previous) == MailboxLevel::Normal
        {
            // Log once when crossing into the warning band
            debug!(
                target: "ca.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                "Mailbox depth elevated"
            );
        }

        if self.actor_type == ActorType::Authority {
            prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);
        }
    }

    /// Record a processed message.
    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        match self.actor_type.mailbox_thresholds() {
            Some((_, warning)) if depth > warning => MailboxLevel::Critical,
            Some((normal, _)) if depth > normal => MailboxLevel::Warning,
            _ => MailboxLevel::Normal,
        }
    }
}

/// Aggregated counters for the actor system, shared by all actors of one
/// authority instance.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// User actors currently alive.
    pub active_users: AtomicUsize,
    /// Total identity-source fetches started by user actors.
    pub user_fetches: AtomicU64,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user_spawned(&self) {
        let active = self.active_users.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_cached_users(active);
    }

    pub fn user_stopped(&self) {
        let previous = self
            .active_users
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_cached_users(previous.saturating_sub(1));
    }

    pub fn record_fetch(&self) {
        self.user_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "ca.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.active_users.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.user_fetches.load(Ordering::Relaxed)
    }
}
