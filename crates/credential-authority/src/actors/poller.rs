//! Change poll loop.
//!
//! Repeatedly asks the identity source which users changed and forwards each
//! UID to the `AuthorityActor` as an invalidation. The in-flight poll is
//! cancelled by the authority's root token; a cancelled poll ends the loop.
//!
//! # Retry Policy
//!
//! - Successful polls are spaced at least `poll_interval` apart
//! - Failed polls back off exponentially from `backoff_base` to `backoff_max`
//! - Backoff resets after the next successful poll

use crate::identity::{IdentityError, UserKeyApi};
use crate::observability::metrics as prom;

use super::messages::AuthorityMessage;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Timing for the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// Spawn the poll loop.
pub fn spawn_poll_loop(
    api: Arc<dyn UserKeyApi>,
    authority: mpsc::Sender<AuthorityMessage>,
    cancel_token: CancellationToken,
    config: PollerConfig,
) -> JoinHandle<()> {
    tokio::spawn(run_poll_loop(api, authority, cancel_token, config))
}

#[instrument(skip_all, name = "ca.actor.poller")]
async fn run_poll_loop(
    api: Arc<dyn UserKeyApi>,
    authority: mpsc::Sender<AuthorityMessage>,
    cancel_token: CancellationToken,
    config: PollerConfig,
) {
    info!(target: "ca.actor.poller", "Poll loop started");

    let mut delay = config.backoff_base;

    loop {
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = cancel_token.cancelled() => Err(IdentityError::Canceled),
            result = api.poll_for_changes(&cancel_token) => result,
        };

        match result {
            Ok(changed) => {
                prom::record_poll("success", changed.len());
                delay = config.backoff_base;

                if !changed.is_empty() {
                    debug!(
                        target: "ca.actor.poller",
                        changed = changed.len(),
                        "Identity source reported changed users"
                    );
                }

                for uid in changed {
                    let sent = tokio::select! {
                        biased;
                        () = cancel_token.cancelled() => false,
                        sent = authority.send(AuthorityMessage::Invalidate { uid }) => sent.is_ok(),
                    };
                    if !sent {
                        info!(target: "ca.actor.poller", "Authority gone, poll loop exiting");
                        return;
                    }
                }

                let remaining = config.poll_interval.saturating_sub(started.elapsed());
                if !remaining.is_zero() && !pause(&cancel_token, remaining).await {
                    break;
                }
            }
            Err(IdentityError::Canceled) => {
                prom::record_poll("canceled", 0);
                break;
            }
            Err(e) => {
                prom::record_poll("error", 0);
                warn!(
                    target: "ca.actor.poller",
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Change poll failed, retrying"
                );

                if !pause(&cancel_token, delay).await {
                    break;
                }
                delay = (delay * 2).min(config.backoff_max);
            }
        }
    }

    info!(target: "ca.actor.poller", "Poll loop stopped");
}

/// Sleep for `duration`, returning false if cancelled first.
async fn pause(cancel_token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel_token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
