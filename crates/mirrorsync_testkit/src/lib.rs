//! # mirrorsync Testkit
//!
//! Test utilities for mirrorsync.
//!
//! This crate provides:
//! - Property-based generators for document values using proptest
//! - A counting store wrapper that records subscriptions and writes
//! - Recorders for observing hook invocations
//!
//! ## Usage
//!
//! ```rust
//! use mirrorsync_testkit::prelude::*;
//!
//! let store = CountingStore::immediate();
//! store.memory().set("users/a", mirrorsync_value::Value::empty_map()).unwrap();
//! assert_eq!(store.write_count(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
