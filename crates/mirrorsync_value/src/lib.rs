//! # mirrorsync Value
//!
//! Document value model and partial-update patches for mirrorsync.
//!
//! This crate provides:
//! - [`Value`], the closed document model (maps, arrays, primitives)
//! - [`deep_equal`], structural equality over arbitrary nested values
//! - [`diff`], the minimal set of changed leaf paths between two values
//! - [`Patch`] and [`FieldPath`], the dotted-path payload of a partial update
//!
//! ## Deep copies
//!
//! `Value` owns all of its children, so `Clone` is a full structural copy.
//! There is no way to build a cyclic value or embed a function, which keeps
//! deep copies total.
//!
//! ## Usage
//!
//! ```
//! use mirrorsync_value::{diff, Value};
//!
//! let old = Value::map([("a", Value::map([("b", 1.into()), ("c", 2.into())]))]);
//! let new = Value::map([("a", Value::map([("b", 1.into()), ("c", 3.into())]))]);
//!
//! let patch = diff(&old, &new);
//! assert_eq!(patch.len(), 1);
//! assert_eq!(patch.get("a.c"), Some(&Value::Integer(3)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod equality;
mod error;
mod patch;
mod value;

pub use equality::{deep_equal, deep_equal_opt};
pub use error::{ValueError, ValueResult};
pub use patch::{diff, FieldPath, Patch};
pub use value::{Value, ValueKind};
