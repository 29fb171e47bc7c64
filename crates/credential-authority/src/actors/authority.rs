//! `AuthorityActor` - supervisor that owns the UID → `UserActor` table.
//!
//! The `AuthorityActor` is the top-level actor of a credential authority:
//!
//! - One per [`CredentialAuthority`] instance
//! - Spawns a `UserActor` on the first check for a UID and routes checks to it
//! - Drops users the poll loop reports as changed
//! - Sweeps the eviction schedule and retires idle users
//! - Owns the root `CancellationToken` for shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! The table and the ticket queue are only ever touched by the actor's own
//! task. The loop never waits on a per-user check: requests are handed to the
//! user's unbounded mailbox and answered by the user actor directly.
//!
//! # Shutdown
//!
//! [`CredentialAuthority::shutdown`] cancels the root token. Every user actor
//! holds a child token, so all of them stop and report
//! [`Engine::evicted`](crate::engine::Engine::evicted); the poll loop's
//! in-flight call is cancelled; the authority waits (bounded) for its
//! children and exits. Shutdown is irreversible.

use crate::config::Config;
use crate::engine::{Engine, SystemEngine};
use crate::errors::CaError;
use crate::identity::UserKeyApi;
use crate::observability::metrics as prom;
use crate::types::{Kid, Timestamp, Uid, Username};

use super::messages::{
    AuthorityMessage, AuthorityStatus, CheckConstraints, CheckRequest, EvictionTicket, KeySets,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::poller::{spawn_poll_loop, PollerConfig};
use super::scheduler::EvictionScheduler;
use super::user::{UserActor, UserActorHandle, UserContext};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the authority mailbox.
const AUTHORITY_CHANNEL_BUFFER: usize = 1000;

/// How many times a check is re-dispatched after a stopping user actor
/// dropped it unanswered.
const MAX_DISPATCH_ATTEMPTS: usize = 3;

/// How long to wait for a removed user actor to finish.
const USER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for each child task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a running credential authority.
///
/// This is the public interface for checking credentials. It is cheap to
/// clone; all clones talk to the same `AuthorityActor`.
#[derive(Clone)]
pub struct CredentialAuthority {
    sender: mpsc::Sender<AuthorityMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl CredentialAuthority {
    /// Start a credential authority on the wall clock.
    ///
    /// This spawns the authority and poll loop tasks and returns immediately.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(api: Arc<dyn UserKeyApi>, config: &Config) -> Self {
        Self::with_engine(api, Arc::new(SystemEngine), config)
    }

    /// Start a credential authority with an injected [`Engine`].
    #[must_use]
    pub fn with_engine(api: Arc<dyn UserKeyApi>, engine: Arc<dyn Engine>, config: &Config) -> Self {
        let (sender, receiver) = mpsc::channel(AUTHORITY_CHANNEL_BUFFER);
        let (ticket_tx, ticket_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let metrics = ActorMetrics::new();

        let poller = spawn_poll_loop(
            Arc::clone(&api),
            sender.clone(),
            cancel_token.child_token(),
            PollerConfig {
                poll_interval: config.poll_interval,
                backoff_base: config.poll_backoff_base,
                backoff_max: config.poll_backoff_max,
            },
        );

        let user_ctx = UserContext {
            api,
            engine: Arc::clone(&engine),
            tickets: ticket_tx,
            metrics: Arc::clone(&metrics),
            freshness: chrono::TimeDelta::from_std(config.user_freshness)
                .unwrap_or(chrono::TimeDelta::MAX),
        };

        let actor = AuthorityActor {
            mailbox: MailboxMonitor::new(ActorType::Authority, &config.authority_id),
            authority_id: config.authority_id.clone(),
            receiver,
            tickets: ticket_rx,
            cancel_token: cancel_token.clone(),
            users: HashMap::new(),
            scheduler: EvictionScheduler::new(config.cache_retention),
            sweep_interval: config.sweep_interval,
            engine,
            user_ctx,
            poller: Some(poller),
            metrics: Arc::clone(&metrics),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Check that `kid` is an active key of `uid` and that `username` is its
    /// current name. Either constraint may be omitted.
    ///
    /// Returns [`CaError::Canceled`] if `cancel` fires first; the user actor
    /// still finishes the check, but nobody waits for the answer.
    pub async fn check_user_key(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
        username: Option<&Username>,
        kid: Option<&Kid>,
    ) -> Result<(), CaError> {
        let constraints = CheckConstraints {
            username: username.cloned(),
            kid: kid.cloned(),
            ..Default::default()
        };
        self.check(cancel, uid, constraints).await
    }

    /// Like [`check_user_key`](Self::check_user_key), but a deleted account
    /// still passes.
    pub async fn check_user_key_allow_deleted(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
        username: Option<&Username>,
        kid: Option<&Kid>,
    ) -> Result<(), CaError> {
        let constraints = CheckConstraints {
            username: username.cloned(),
            kid: kid.cloned(),
            allow_deleted: true,
            ..Default::default()
        };
        self.check(cancel, uid, constraints).await
    }

    /// Check that the user's active sibkeys and subkeys are exactly the given
    /// sets. Order and duplicates are ignored.
    pub async fn compare_user_keys(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
        sibkeys: &[Kid],
        subkeys: &[Kid],
    ) -> Result<(), CaError> {
        let constraints = CheckConstraints {
            expected_keys: Some(KeySets::new(
                sibkeys.iter().cloned(),
                subkeys.iter().cloned(),
            )),
            ..Default::default()
        };
        self.check(cancel, uid, constraints).await
    }

    /// Check, one after another, that every user exists. The public UID
    /// always passes. Stops at the first failure.
    pub async fn check_users(&self, cancel: &CancellationToken, uids: &[Uid]) -> Result<(), CaError> {
        for uid in uids.iter().filter(|uid| !uid.is_public()) {
            self.check_user_key(cancel, uid, None, None).await?;
        }
        Ok(())
    }

    /// Get the current authority status.
    pub async fn status(&self) -> Result<AuthorityStatus, CaError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AuthorityMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|_| CaError::Shutdown)?;

        rx.await.map_err(|_| CaError::Shutdown)
    }

    /// Stop all background activity. Idempotent; cannot be undone.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Total identity-source fetches started by this authority's user actors.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.metrics.fetch_count()
    }

    /// Route one check and wait for its answer.
    async fn check(
        &self,
        cancel: &CancellationToken,
        uid: &Uid,
        constraints: CheckConstraints,
    ) -> Result<(), CaError> {
        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let (tx, rx) = oneshot::channel();
            let message = AuthorityMessage::Check(CheckRequest {
                uid: uid.clone(),
                constraints: constraints.clone(),
                respond_to: tx,
            });

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CaError::Canceled),
                () = self.cancel_token.cancelled() => return Err(CaError::Shutdown),
                sent = self.sender.send(message) => {
                    if sent.is_err() {
                        return Err(CaError::Shutdown);
                    }
                }
            }

            let reply = tokio::select! {
                biased;
                reply = rx => reply,
                () = cancel.cancelled() => return Err(CaError::Canceled),
                () = self.cancel_token.cancelled() => return Err(CaError::Shutdown),
            };

            match reply {
                Ok(result) => return result,
                Err(_) if self.cancel_token.is_cancelled() => return Err(CaError::Shutdown),
                Err(_) => {
                    debug!(
                        target: "ca.actor.authority",
                        uid = %uid,
                        attempt = attempt,
                        "User actor stopped before answering, re-dispatching check"
                    );
                }
            }
        }

        Err(CaError::Internal(format!(
            "check for {uid} dropped {MAX_DISPATCH_ATTEMPTS} times"
        )))
    }
}

/// Supervisor-side state for one cached user.
struct CacheEntry {
    handle: UserActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Last time a check was routed to this user.
    last_access: Timestamp,
}

/// The `AuthorityActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct AuthorityActor {
    authority_id: String,
    receiver: mpsc::Receiver<AuthorityMessage>,
    tickets: mpsc::UnboundedReceiver<EvictionTicket>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Cached users by UID.
    users: HashMap<Uid, CacheEntry>,
    scheduler: EvictionScheduler,
    sweep_interval: Duration,
    engine: Arc<dyn Engine>,
    /// Template for spawning user actors.
    user_ctx: UserContext,
    poller: Option<JoinHandle<()>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl AuthorityActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "ca.actor.authority", fields(authority_id = %self.authority_id))]
    async fn run(mut self) {
        info!(
            target: "ca.actor.authority",
            authority_id = %self.authority_id,
            "AuthorityActor started"
        );

        let mut sweep_ticker = tokio::time::interval(self.sweep_interval);
        sweep_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Check for terminated child tasks
            self.check_child_health().await;

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "ca.actor.authority",
                        authority_id = %self.authority_id,
                        "AuthorityActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message);
                            self.mailbox.record_processed();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            // All handles dropped, exit
                            info!(
                                target: "ca.actor.authority",
                                authority_id = %self.authority_id,
                                "AuthorityActor channel closed, exiting"
                            );
                            self.cancel_token.cancel();
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                Some(ticket) = self.tickets.recv() => {
                    self.scheduler.push(ticket);
                }

                () = self.engine.poked() => {
                    debug!(target: "ca.actor.authority", "AuthorityActor poked");
                }

                _ = sweep_ticker.tick() => {}
            }

            self.sweep();
        }

        info!(
            target: "ca.actor.authority",
            authority_id = %self.authority_id,
            users_remaining = self.users.len(),
            messages_processed = self.mailbox.messages_processed(),
            "AuthorityActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: AuthorityMessage) {
        match message {
            AuthorityMessage::Check(request) => self.route_check(request),

            AuthorityMessage::Invalidate { uid } => {
                if self.remove_user(&uid, "invalidated") {
                    debug!(
                        target: "ca.actor.authority",
                        uid = %uid,
                        "Dropped changed user from cache"
                    );
                }
            }

            AuthorityMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
        }
    }

    /// Hand a check to the user's actor, spawning it first if needed.
    fn route_check(&mut self, request: CheckRequest) {
        let now = self.engine.now();
        let uid = request.uid.clone();

        if !self.users.contains_key(&uid) {
            let entry = self.spawn_user(&uid, now);
            self.users.insert(uid.clone(), entry);
        }

        let Some(entry) = self.users.get_mut(&uid) else {
            return;
        };

        entry.last_access = now;
        if let Err(request) = entry.handle.dispatch(request) {
            // The actor died without being removed; replace it
            warn!(
                target: "ca.actor.authority",
                uid = %uid,
                "User actor mailbox closed, respawning"
            );
            self.remove_user(&uid, "failed");
            self.route_check(request);
        }
    }

    fn spawn_user(&self, uid: &Uid, now: Timestamp) -> CacheEntry {
        let (handle, task_handle) = UserActor::spawn(
            uid.clone(),
            self.cancel_token.child_token(),
            self.user_ctx.clone(),
        );

        debug!(
            target: "ca.actor.authority",
            uid = %uid,
            total_users = self.users.len() + 1,
            "User actor created"
        );

        CacheEntry {
            handle,
            task_handle,
            last_access: now,
        }
    }

    /// Remove a user from the table and stop its actor.
    ///
    /// Does not block waiting for the actor task to complete; the join is
    /// spawned as a background task.
    fn remove_user(&mut self, uid: &Uid, reason: &'static str) -> bool {
        let Some(entry) = self.users.remove(uid) else {
            return false;
        };

        entry.handle.cancel();
        prom::record_eviction(reason);

        let uid_owned = uid.clone();
        let metrics = Arc::clone(&self.metrics);
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match tokio::time::timeout(USER_STOP_TIMEOUT, entry.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "ca.actor.authority",
                        uid = %uid_owned,
                        error = ?e,
                        "User actor task panicked during removal"
                    );
                    if e.is_panic() {
                        report_panicked_user(&metrics, engine.as_ref(), &uid_owned);
                    }
                }
                Err(_) => {
                    warn!(
                        target: "ca.actor.authority",
                        uid = %uid_owned,
                        "User actor task cleanup timed out"
                    );
                }
            }
        });

        debug!(
            target: "ca.actor.authority",
            uid = %uid,
            reason = reason,
            total_users = self.users.len(),
            "User actor removed"
        );

        true
    }

    /// Retire users whose eviction tickets have aged out untouched.
    fn sweep(&mut self) {
        let now = self.engine.now();
        let users = &self.users;
        let due = self
            .scheduler
            .sweep(now, |uid| users.get(uid).map(|entry| entry.last_access));

        for uid in due {
            if self.remove_user(&uid, "sweep") {
                info!(
                    target: "ca.actor.authority",
                    uid = %uid,
                    "Evicted idle user"
                );
            }
        }
    }

    fn get_status(&self) -> AuthorityStatus {
        AuthorityStatus {
            cached_users: self.users.len(),
            pending_tickets: self.scheduler.len(),
            mailbox_depth: self.mailbox.current_depth(),
            peak_mailbox_depth: self.mailbox.peak_depth(),
        }
    }

    /// Stop every user actor and wait for them and the poll loop.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "ca.actor.authority",
            authority_id = %self.authority_id,
            user_count = self.users.len(),
            "Performing graceful shutdown"
        );

        // Already cancelled via the parent token, but be explicit
        for entry in self.users.values() {
            entry.handle.cancel();
        }

        for (uid, entry) in self.users.drain() {
            prom::record_eviction("shutdown");
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, entry.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "ca.actor.authority",
                        uid = %uid,
                        error = ?e,
                        "User actor task panicked during shutdown"
                    );
                    if e.is_panic() {
                        report_panicked_user(&self.metrics, self.engine.as_ref(), &uid);
                    }
                }
                Err(_) => {
                    warn!(
                        target: "ca.actor.authority",
                        uid = %uid,
                        "User actor shutdown timed out"
                    );
                }
            }
        }

        if let Some(poller) = self.poller.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, poller).await.is_err() {
                warn!(
                    target: "ca.actor.authority",
                    authority_id = %self.authority_id,
                    "Poll loop shutdown timed out"
                );
            }
        }

        info!(
            target: "ca.actor.authority",
            authority_id = %self.authority_id,
            "Graceful shutdown complete"
        );
    }

    /// Reap child tasks that finished without being asked to.
    async fn check_child_health(&mut self) {
        let finished: Vec<Uid> = self
            .users
            .iter()
            .filter(|(_, entry)| entry.task_handle.is_finished())
            .map(|(uid, _)| uid.clone())
            .collect();

        for uid in finished {
            let Some(entry) = self.users.remove(&uid) else {
                continue;
            };

            match entry.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "ca.actor.authority",
                        uid = %uid,
                        "User actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "ca.actor.authority",
                            uid = %uid,
                            error = ?join_error,
                            "User actor panicked"
                        );
                        report_panicked_user(&self.metrics, self.engine.as_ref(), &uid);
                    }
                }
            }
        }

        let poller_finished = self
            .poller
            .as_ref()
            .is_some_and(|poller| poller.is_finished());
        if poller_finished && !self.cancel_token.is_cancelled() {
            if let Some(poller) = self.poller.take() {
                match poller.await {
                    Err(join_error) if join_error.is_panic() => {
                        self.metrics.record_panic(ActorType::Poller);
                    }
                    _ => {
                        warn!(
                            target: "ca.actor.authority",
                            authority_id = %self.authority_id,
                            "Poll loop exited; cache will no longer see remote changes"
                        );
                    }
                }
            }
        }
    }
}

/// Account for a user actor that died without reaching its own exit path.
fn report_panicked_user(metrics: &ActorMetrics, engine: &dyn Engine, uid: &Uid) {
    metrics.record_panic(ActorType::User);
    metrics.user_stopped();
    engine.evicted(uid);
}
