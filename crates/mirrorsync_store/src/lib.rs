//! # mirrorsync Store
//!
//! Remote document-store interface for mirrorsync.
//!
//! This crate provides:
//! - [`DocumentStore`], the narrow client interface mirrors consume
//!   (subscribe to a change feed, apply a partial update)
//! - [`Reference`] and [`SubscriptionKey`] for documents and queries
//! - [`Snapshot`] types with added / modified / removed change classification
//! - [`MemoryStore`], an in-process implementation
//!
//! The store owns query execution and conflict handling (last writer wins);
//! mirrors only react to what the feed reports.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod reference;
mod snapshot;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{Delivery, MemoryStore, MemoryStoreConfig};
pub use reference::{
    CollectionPath, Direction, DocumentPath, Filter, OrderBy, QuerySpec, Reference,
    SubscriptionKey,
};
pub use snapshot::{
    ChangeKind, DocumentChange, DocumentSnapshot, QuerySnapshot, Snapshot, SnapshotMetadata,
};
pub use store::{DocumentStore, ErrorHandler, SnapshotHandler, Subscription, WriteCallback};
