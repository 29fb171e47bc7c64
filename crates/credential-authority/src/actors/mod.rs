//! Actor model implementation for the credential authority.
//!
//! ```text
//! AuthorityActor (one per CredentialAuthority)
//! ├── supervises N UserActors
//! │   └── UserActor (one per cached UID)
//! │       ├── owns the user's last fetched snapshot
//! │       └── cuts eviction tickets after each fetch
//! ├── owns the EvictionScheduler (FIFO ticket queue)
//! └── poll loop (forwards remote changes as invalidations)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per user**: checks for the same UID are serialized, checks for
//!   different UIDs never wait on each other
//! - **CancellationToken propagation**: every user actor holds a child of the
//!   root token, so shutdown reaches all of them with one `cancel()`
//! - **Non-blocking supervisor**: user mailboxes and the ticket channel are
//!   unbounded; the authority loop never awaits a user fetch
//! - **Mailbox monitoring**: depth thresholds with metrics (Authority: 100/500, User: 10/50)
//!
//! # Modules
//!
//! - [`authority`] - `AuthorityActor` supervisor and the public [`CredentialAuthority`] handle
//! - [`user`] - `UserActor` per cached user
//! - [`scheduler`] - FIFO eviction schedule
//! - [`poller`] - Change poll loop
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod authority;
pub mod messages;
pub mod metrics;
pub mod poller;
pub mod scheduler;
pub mod user;

// Re-export primary types
pub use authority::{AuthorityActor, CredentialAuthority};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use poller::{spawn_poll_loop, PollerConfig};
pub use scheduler::EvictionScheduler;
pub use user::{UserActor, UserActorHandle, UserContext};
