//! # mirrorsync Engine
//!
//! Bidirectional mirrors between a remote document store and local,
//! observable copies.
//!
//! This crate provides:
//! - [`EntityMirror`] for a single document
//! - [`QueryMirror`] for every document matching a query
//! - [`SyncRegistry`], which hands out one shared mirror per reference
//! - [`Observed`], the local cell whose edits are written back
//!
//! ## Sync model
//!
//! Remote snapshots overwrite local copies. Local edits are written back as
//! partial updates: the whole document by default, or only the changed
//! field paths. Two guards keep the loop from feeding itself:
//!
//! - an overwrite that came from the store never triggers a write
//! - the store's echo of our own write never overwrites local data
//!
//! Snapshots flagged with pending writes are ignored. There is no conflict
//! resolution beyond the store's own last-writer-wins.
//!
//! ## Example
//!
//! ```
//! use mirrorsync_engine::SyncRegistry;
//! use mirrorsync_store::{MemoryStore, Reference};
//! use mirrorsync_value::Value;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.set("todos/1", Value::map([("done", Value::from(false))])).unwrap();
//!
//! let registry = SyncRegistry::new(store.clone());
//! let todos = registry.get_or_create(&Reference::collection("todos").unwrap(), None);
//! let todos = todos.as_query().unwrap();
//!
//! todos
//!     .edit_member("1", |todo| {
//!         todo.insert("done", Value::from(true)).unwrap();
//!     })
//!     .unwrap();
//! assert_eq!(store.get("todos/1").unwrap().get("done"), Some(&Value::from(true)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod observe;
mod query;
mod registry;
mod state;

pub use config::{
    DownloadHook, EchoGranularity, ErrorHook, MirrorOptions, RegistryConfig, TransformUpdate,
    UpdateHook,
};
pub use entity::EntityMirror;
pub use error::{MirrorError, MirrorResult};
pub use observe::{ChangeHandler, ObserverHandle, Observed};
pub use query::{MirrorItem, QueryMirror};
pub use registry::{Mirror, SyncRegistry};
pub use state::MirrorStatus;

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
