//! `UserActor` - per-user actor that owns one user's snapshot.
//!
//! Each `UserActor`:
//! - Owns the username and key sets last fetched for one UID
//! - Answers checks strictly in arrival order (single mailbox)
//! - Lazily re-fetches from the identity source when its snapshot is stale
//! - Cuts one eviction ticket per successful fetch
//!
//! # Lifecycle
//!
//! 1. Spawned by the `AuthorityActor` on the first check for its UID
//! 2. Runs until its cancellation token fires. The token is a child of the
//!    authority's root token, so both eviction and shutdown stop it
//! 3. Reports itself to [`Engine::evicted`] exactly once on exit

use crate::engine::Engine;
use crate::errors::CaError;
use crate::identity::{IdentityError, UserKeyApi, UserRecord};
use crate::observability::metrics as prom;
use crate::types::{Timestamp, Uid};

use super::messages::{CheckConstraints, CheckRequest, EvictionTicket, UserMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Handle to a `UserActor`.
#[derive(Clone, Debug)]
pub struct UserActorHandle {
    sender: mpsc::UnboundedSender<UserMessage>,
    cancel_token: CancellationToken,
    uid: Uid,
}

impl UserActorHandle {
    #[must_use]
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Queue a check on this actor without waiting for it to run.
    ///
    /// Returns the request back if the actor has already exited.
    pub fn dispatch(&self, request: CheckRequest) -> Result<(), CheckRequest> {
        self.sender
            .send(UserMessage::Check(request))
            .map_err(|e| match e.0 {
                UserMessage::Check(request) => request,
            })
    }

    /// Stop the user actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Dependencies shared by every user actor of one authority.
#[derive(Clone)]
pub struct UserContext {
    pub api: Arc<dyn UserKeyApi>,
    pub engine: Arc<dyn Engine>,
    /// Unbounded, so emitting a ticket never waits on the authority loop.
    pub tickets: mpsc::UnboundedSender<EvictionTicket>,
    pub metrics: Arc<ActorMetrics>,
    /// How long a fetched snapshot is trusted.
    pub freshness: chrono::TimeDelta,
}

/// Last fetch result for one user.
#[derive(Debug)]
struct UserSnapshot {
    record: UserRecord,
    fetched_at: Timestamp,
    /// False once a re-fetch failed; the record must not be trusted.
    is_valid: bool,
}

/// The `UserActor` implementation.
pub struct UserActor {
    uid: Uid,
    receiver: mpsc::UnboundedReceiver<UserMessage>,
    /// Cancellation token (child of the authority's root token).
    cancel_token: CancellationToken,
    ctx: UserContext,
    snapshot: Option<UserSnapshot>,
    mailbox: MailboxMonitor,
}

impl UserActor {
    /// Spawn a new user actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        uid: Uid,
        cancel_token: CancellationToken,
        ctx: UserContext,
    ) -> (UserActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        ctx.metrics.user_spawned();

        let actor = Self {
            uid: uid.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: MailboxMonitor::new(ActorType::User, uid.as_str()),
            ctx,
            snapshot: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = UserActorHandle {
            sender,
            cancel_token,
            uid,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "ca.actor.user", fields(uid = %self.uid))]
    async fn run(mut self) {
        debug!(target: "ca.actor.user", uid = %self.uid, "UserActor started");

        loop {
            tokio::select! {
                biased;

                // Eviction, invalidation, or authority shutdown
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "ca.actor.user",
                        uid = %self.uid,
                        "UserActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(UserMessage::Check(request)) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_check(request).await;
                            self.mailbox.record_processed();
                            self.ctx.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "ca.actor.user",
                                uid = %self.uid,
                                "UserActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.ctx.metrics.user_stopped();
        self.ctx.engine.evicted(&self.uid);

        debug!(
            target: "ca.actor.user",
            uid = %self.uid,
            messages_processed = self.mailbox.messages_processed(),
            "UserActor stopped"
        );
    }

    /// Answer one check, re-fetching first if the snapshot is not trusted.
    async fn handle_check(&mut self, request: CheckRequest) {
        let CheckRequest {
            constraints,
            respond_to,
            ..
        } = request;

        if !self.is_populated(self.ctx.engine.now()) {
            match self.repopulate().await {
                Ok(()) => {}
                Err(IdentityError::Canceled) if self.cancel_token.is_cancelled() => {
                    // Stopping mid-fetch: leave the request unanswered so the
                    // caller re-dispatches it (or sees shutdown).
                    debug!(
                        target: "ca.actor.user",
                        uid = %self.uid,
                        "Fetch abandoned, actor stopping"
                    );
                    return;
                }
                Err(e) => {
                    prom::record_check("error");
                    let _ = respond_to.send(Err(CaError::Upstream(e)));
                    return;
                }
            }
        }

        let result = self.evaluate(&constraints);
        prom::record_check(match &result {
            Ok(()) => "ok",
            Err(e) if e.is_rejection() => "rejected",
            Err(_) => "error",
        });
        let _ = respond_to.send(result);
    }

    /// A snapshot is trusted while valid and no older than the freshness window.
    fn is_populated(&self, now: Timestamp) -> bool {
        self.snapshot.as_ref().is_some_and(|snapshot| {
            snapshot.is_valid
                && now.signed_duration_since(snapshot.fetched_at) <= self.ctx.freshness
        })
    }

    /// Fetch the user from the identity source and replace the snapshot.
    async fn repopulate(&mut self) -> Result<(), IdentityError> {
        self.ctx.metrics.record_fetch();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Err(IdentityError::Canceled),
            result = self.ctx.api.get_user(&self.cancel_token, &self.uid) => result,
        };

        match result {
            Ok(record) => {
                prom::record_user_fetch("success", started.elapsed());

                let fetched_at = self.ctx.engine.now();
                debug!(
                    target: "ca.actor.user",
                    uid = %self.uid,
                    username = %record.username,
                    sibkeys = record.sibkeys.len(),
                    subkeys = record.subkeys.len(),
                    "User snapshot refreshed"
                );
                self.snapshot = Some(UserSnapshot {
                    record,
                    fetched_at,
                    is_valid: true,
                });

                // Fire-and-forget; fails only once the authority loop is gone
                let _ = self.ctx.tickets.send(EvictionTicket {
                    uid: self.uid.clone(),
                    scheduled_at: fetched_at,
                });

                Ok(())
            }
            Err(e) => {
                let status = if matches!(e, IdentityError::Canceled) {
                    "canceled"
                } else {
                    "error"
                };
                prom::record_user_fetch(status, started.elapsed());

                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.is_valid = false;
                }

                warn!(
                    target: "ca.actor.user",
                    uid = %self.uid,
                    error = %e,
                    "Failed to fetch user from identity source"
                );
                Err(e)
            }
        }
    }

    /// Compare the request's constraints against the (trusted) snapshot.
    fn evaluate(&self, constraints: &CheckConstraints) -> Result<(), CaError> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Err(CaError::Internal(
                "user snapshot missing after fetch".to_string(),
            ));
        };
        let record = &snapshot.record;

        if record.is_deleted && !constraints.allow_deleted {
            return Err(CaError::UserDeleted {
                uid: self.uid.clone(),
            });
        }

        if let Some(username) = &constraints.username {
            if *username != record.username {
                return Err(CaError::BadUsername {
                    expected: record.username.clone(),
                    received: username.clone(),
                });
            }
        }

        if let Some(kid) = &constraints.kid {
            if !record.has_key(kid) {
                return Err(CaError::BadKey {
                    uid: self.uid.clone(),
                    kid: kid.clone(),
                });
            }
        }

        if let Some(expected) = &constraints.expected_keys {
            if expected.sibkeys != record.sibkeys || expected.subkeys != record.subkeys {
                return Err(CaError::KeysNotEqual {
                    uid: self.uid.clone(),
                });
            }
        }

        Ok(())
    }
}
