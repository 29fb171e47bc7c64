//! # CA Test Utilities
//!
//! Shared test utilities for the credential authority.
//!
//! This crate provides mock implementations and test fixtures for driving a
//! [`CredentialAuthority`](credential_authority::CredentialAuthority) without a
//! real identity service or wall clock.
//!
//! ## Modules
//!
//! - `mock_identity` - In-memory identity source with fetch counting and scripted changes
//! - `manual_engine` - Hand-driven clock that records evictions
//! - `fixtures` - Pre-configured users and configs
//! - `logging` - Test tracing subscriber
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ca_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let alice = TestUser::new("alice").with_sibkey("kid-1");
//!     let api = MockUserKeyApi::new().with_user(&alice);
//!     let engine = ManualEngine::new();
//!
//!     let ca = CredentialAuthority::with_engine(api.shared(), engine.clone(), &test_config());
//!     engine.advance(Duration::from_secs(60));
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod logging;
pub mod manual_engine;
pub mod mock_identity;

// Re-export commonly used items
pub use fixtures::*;
pub use logging::*;
pub use manual_engine::*;
pub use mock_identity::*;
