//! Credential Authority Library
//!
//! An in-process cache that answers "is this key currently valid for this
//! user?" for a long-running server:
//!
//! - Validates (UID, username, key ID) assertions against the identity source
//! - Serves repeat checks from a short-lived per-user snapshot
//! - Drops users the identity source reports as changed
//! - Forgets users that have gone unused for the retention window
//! - Stops all background work on a single, irreversible shutdown
//!
//! # Architecture
//!
//! ```text
//! CredentialAuthority (cloneable handle)
//!   │  mpsc
//!   ▼
//! AuthorityActor ──── poll loop ◄── UserKeyApi::poll_for_changes
//!   │  one unbounded mailbox per UID
//!   ▼
//! UserActor ───────────────────► UserKeyApi::get_user
//!   │  eviction tickets
//!   ▼
//! EvictionScheduler (swept by the AuthorityActor)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Authority, user actors, scheduler and poll loop
//! - [`config`] - Cache timings from environment
//! - [`engine`] - Clock and lifecycle hooks
//! - [`errors`] - Error types returned to callers
//! - [`identity`] - Identity source trait and user records
//! - [`observability`] - Metrics emitted by the actors
//! - [`types`] - UID, username and key ID newtypes

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod types;

pub use actors::{AuthorityStatus, CredentialAuthority};
pub use config::{Config, ConfigError};
pub use engine::{Engine, SystemEngine};
pub use errors::CaError;
pub use identity::{IdentityError, UserKeyApi, UserRecord};
pub use types::{Kid, Timestamp, Uid, Username, PUBLIC_UID};
