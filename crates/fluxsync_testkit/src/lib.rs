//! # Fluxsync Testkit
//!
//! Test utilities for Fluxsync.
//!
//! This crate provides:
//! - Test fixtures wiring an engine over throwaway stores
//! - A simulated provider account that assigns update sequence numbers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fluxsync_testkit::prelude::*;
//!
//! #[test]
//! fn syncs_a_tag() {
//!     with_test_env(|env| {
//!         let account = Arc::new(ScriptedAccount::new(env.clock.clone()));
//!         account.put_tag("t1", "travel");
//!         let id = env.connect(account.clone());
//!         env.sync_committed(id);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use account::*;
pub use fixtures::*;
pub use generators::*;
