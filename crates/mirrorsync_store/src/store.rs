//! Document store abstraction.

use crate::error::{StoreError, StoreResult};
use crate::reference::{DocumentPath, Reference};
use crate::snapshot::Snapshot;
use mirrorsync_value::Patch;
use std::fmt;
use std::sync::Arc;

/// Receives change-feed events of a subscription.
pub type SnapshotHandler = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Receives the terminal error of a subscription.
pub type ErrorHandler = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Receives the outcome of an update.
pub type WriteCallback = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// A remote document store with change feeds and partial updates.
///
/// This trait abstracts the store client, allowing for different
/// implementations (network clients, the in-process [`MemoryStore`], test
/// doubles).
///
/// [`MemoryStore`]: crate::MemoryStore
pub trait DocumentStore: Send + Sync {
    /// Opens a change feed for `reference`.
    ///
    /// The feed delivers an initial snapshot followed by one snapshot per
    /// change. A feed that fails calls `on_error` once and delivers nothing
    /// afterwards.
    fn subscribe(
        &self,
        reference: &Reference,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> StoreResult<Subscription>;

    /// Merges `patch` into the document at `path`.
    ///
    /// The call does not block on the outcome; `on_complete` is invoked once
    /// the store accepted or rejected the write.
    fn update(&self, path: &DocumentPath, patch: Patch, on_complete: WriteCallback);
}

/// Handle of an open change feed.
///
/// Unsubscribing runs the store's detach function exactly once; later calls
/// and the final drop do nothing.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when detached.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detaches the feed. Returns true if this call performed the detach.
    pub fn unsubscribe(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true until the feed has been detached.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
