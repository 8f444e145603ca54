//! Test fixtures: an instrumented store and hook recorders.

use mirrorsync_store::{
    DocumentPath, DocumentStore, ErrorHandler, MemoryStore, Reference, SnapshotHandler,
    StoreResult, Subscription, WriteCallback,
};
use mirrorsync_value::Patch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A write seen by [`CountingStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    /// Target document.
    pub path: DocumentPath,
    /// Payload as issued.
    pub patch: Patch,
}

/// A [`MemoryStore`] wrapper that counts feed attaches and detaches and
/// records every write.
pub struct CountingStore {
    memory: Arc<MemoryStore>,
    subscribes: AtomicUsize,
    unsubscribes: Arc<AtomicUsize>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl CountingStore {
    /// Wraps a store with immediate delivery.
    pub fn immediate() -> Arc<Self> {
        Self::wrap(Arc::new(MemoryStore::new()))
    }

    /// Wraps a store with manual delivery.
    pub fn manual() -> Arc<Self> {
        Self::wrap(Arc::new(MemoryStore::manual()))
    }

    /// Wraps an existing store.
    pub fn wrap(memory: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            memory,
            subscribes: AtomicUsize::new(0),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Returns the wrapped store.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Returns how many feeds were opened.
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Returns how many detach functions ran.
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Returns how many writes were issued.
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Returns every write issued so far.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Returns the most recent write.
    pub fn last_write(&self) -> Option<RecordedWrite> {
        self.writes.lock().last().cloned()
    }
}

impl DocumentStore for CountingStore {
    fn subscribe(
        &self,
        reference: &Reference,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> StoreResult<Subscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.memory.subscribe(reference, on_snapshot, on_error)?;
        let unsubscribes = Arc::clone(&self.unsubscribes);
        Ok(Subscription::new(move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
            inner.unsubscribe();
        }))
    }

    fn update(&self, path: &DocumentPath, patch: Patch, on_complete: WriteCallback) {
        self.writes.lock().push(RecordedWrite {
            path: path.clone(),
            patch: patch.clone(),
        });
        self.memory.update(path, patch, on_complete);
    }
}

/// Collects values passed to a hook.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Records one event.
    pub fn record(&self, event: T) {
        self.events.lock().push(event);
    }

    /// Returns the recorded events in order.
    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<T: Clone> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

/// Parses a document path, panicking on invalid input.
pub fn doc_path(path: &str) -> DocumentPath {
    DocumentPath::parse(path).expect("valid document path")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_store::{Snapshot, StoreError};
    use mirrorsync_value::Value;

    #[test]
    fn counts_detaches_once() {
        let store = CountingStore::immediate();
        let reference = Reference::doc("users/a").unwrap();
        let mut subscription = store
            .subscribe(
                &reference,
                Arc::new(|_: Snapshot| {}),
                Arc::new(|_: StoreError| {}),
            )
            .unwrap();

        subscription.unsubscribe();
        subscription.unsubscribe();
        drop(subscription);

        assert_eq!(store.subscribe_count(), 1);
        assert_eq!(store.unsubscribe_count(), 1);
        assert_eq!(store.memory().active_subscriptions(), 0);
    }

    #[test]
    fn records_writes() {
        let store = CountingStore::immediate();
        store.memory().set("users/a", Value::empty_map()).unwrap();

        let mut patch = Patch::new();
        patch.insert("name", Value::from("A"));
        store.update(&doc_path("users/a"), patch.clone(), Box::new(|_| {}));

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.last_write().unwrap().patch, patch);
        assert_eq!(
            store.memory().get("users/a").unwrap().get("name"),
            Some(&Value::from("A"))
        );
    }

    #[test]
    fn recorder_clones_share_events() {
        let recorder = Recorder::new();
        let other = recorder.clone();
        other.record(1);
        recorder.record(2);
        assert_eq!(recorder.events(), vec![1, 2]);
        recorder.clear();
        assert!(other.is_empty());
    }
}
