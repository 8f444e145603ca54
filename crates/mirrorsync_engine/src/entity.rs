//! Mirror of a single document.

use crate::config::MirrorOptions;
use crate::error::{MirrorError, MirrorResult};
use crate::observe::{ObserverHandle, Observed};
use crate::state::{build_payload, project, LocalDecision, MirrorState, MirrorStatus, RemoteDecision};
use mirrorsync_store::{
    DocumentPath, DocumentStore, ErrorHandler, Reference, Snapshot, SnapshotHandler,
    SnapshotMetadata, StoreError, StoreResult, Subscription,
};
use mirrorsync_value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Keeps a local copy of one remote document in two-way sync.
///
/// Remote changes overwrite the local cell; local edits are written back
/// as partial updates. Cloning yields another handle to the same mirror.
///
/// # Example
///
/// ```
/// use mirrorsync_engine::{EntityMirror, MirrorOptions};
/// use mirrorsync_store::{DocumentPath, MemoryStore};
/// use mirrorsync_value::Value;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// store
///     .set("users/alice", Value::map([("name", Value::from("Alice"))]))
///     .unwrap();
///
/// let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
/// mirror.open(DocumentPath::parse("users/alice").unwrap()).unwrap();
/// assert_eq!(mirror.value().get("name"), Some(&Value::from("Alice")));
///
/// mirror.edit(|doc| {
///     doc.insert("name", Value::from("Alicia")).unwrap();
/// });
/// let stored = store.get("users/alice").unwrap();
/// assert_eq!(stored.get("name"), Some(&Value::from("Alicia")));
/// ```
#[derive(Clone)]
pub struct EntityMirror {
    inner: Arc<EntityInner>,
}

struct EntityInner {
    store: Arc<dyn DocumentStore>,
    local: Observed,
    state: Mutex<EntityState>,
}

struct EntityState {
    options: MirrorOptions,
    path: Option<DocumentPath>,
    status: MirrorStatus,
    /// Bumped on every open and close; callbacks of older feeds are dropped.
    generation: u64,
    doc: MirrorState,
    subscription: Option<Subscription>,
    observer: Option<ObserverHandle>,
}

impl EntityState {
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.status.is_disposed()
    }
}

impl EntityMirror {
    /// Creates an unopened mirror.
    pub fn new(store: Arc<dyn DocumentStore>, options: MirrorOptions) -> Self {
        let local = Observed::default();
        Self {
            inner: Arc::new(EntityInner {
                store,
                state: Mutex::new(EntityState {
                    options,
                    path: None,
                    status: MirrorStatus::Uninitialized,
                    generation: 0,
                    doc: MirrorState::new(local.clone()),
                    subscription: None,
                    observer: None,
                }),
                local,
            }),
        }
    }

    /// Starts following the document at `path`.
    ///
    /// Any previous feed and observer are detached and the state is reset
    /// first. Opening the path that is already followed does nothing, unless
    /// its feed failed. A feed that cannot be opened leaves the mirror
    /// errored.
    pub fn open(&self, path: DocumentPath) -> MirrorResult<()> {
        let (generation, previous, had_path) = {
            let mut state = self.inner.state.lock();
            if state.status.is_disposed() {
                return Err(MirrorError::Disposed);
            }
            let following = matches!(
                state.status,
                MirrorStatus::Subscribed | MirrorStatus::Active
            );
            if following && state.path.as_ref() == Some(&path) {
                return Ok(());
            }
            state.generation += 1;
            let previous = (state.subscription.take(), state.observer.take());
            let had_path = state.path.replace(path.clone()).is_some();
            state.doc.reset();
            state.status = MirrorStatus::Subscribed;
            (state.generation, previous, had_path)
        };
        drop(previous);
        if had_path {
            self.inner.local.replace(Value::Null);
        }
        debug!(path = %path, "opening document mirror");

        // The observer goes in first so that it consumes the overwrite of an
        // initial snapshot delivered during subscribe.
        let observer = self.inner.attach_observer(generation);
        let stale = {
            let mut state = self.inner.state.lock();
            if state.accepts(generation) {
                state.observer = Some(observer);
                None
            } else {
                Some(observer)
            }
        };
        if stale.is_some() {
            return Ok(());
        }

        let on_snapshot: SnapshotHandler = {
            let weak = Arc::downgrade(&self.inner);
            Arc::new(move |snapshot: Snapshot| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_snapshot(generation, snapshot);
                }
            })
        };
        let on_error: ErrorHandler = {
            let weak = Arc::downgrade(&self.inner);
            Arc::new(move |source: StoreError| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_feed_error(generation, source);
                }
            })
        };

        let reference = Reference::Document(path.clone());
        match self.inner.store.subscribe(&reference, on_snapshot, on_error) {
            Ok(subscription) => {
                let stale = {
                    let mut state = self.inner.state.lock();
                    if state.accepts(generation) {
                        state.subscription = Some(subscription);
                        None
                    } else {
                        Some(subscription)
                    }
                };
                drop(stale);
                Ok(())
            }
            Err(source) => {
                let error = MirrorError::subscription(path.as_str(), source);
                self.inner.record_feed_failure(generation, error.clone());
                Err(error)
            }
        }
    }

    /// Detaches the feed and the observer for good.
    ///
    /// Returns false if the mirror was already closed. No callback fires
    /// after this returns.
    pub fn close(&self) -> bool {
        let (subscription, observer) = {
            let mut state = self.inner.state.lock();
            if state.status.is_disposed() {
                return false;
            }
            state.status = MirrorStatus::Disposed;
            state.generation += 1;
            (state.subscription.take(), state.observer.take())
        };
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(mut observer) = observer {
            observer.detach();
        }
        debug!("closed document mirror");
        true
    }

    /// Replaces the local observer with a fresh one, optionally installing
    /// new options. The feed stays attached.
    pub fn reattach(&self, options: Option<MirrorOptions>) -> MirrorResult<()> {
        let (previous, generation, live) = {
            let mut state = self.inner.state.lock();
            if state.status.is_disposed() {
                return Err(MirrorError::Disposed);
            }
            if let Some(options) = options {
                state.options = options;
            }
            state.doc.suppress_next_local_reaction = false;
            (state.observer.take(), state.generation, state.status.is_live())
        };
        drop(previous);
        if !live {
            return Ok(());
        }

        let observer = self.inner.attach_observer(generation);
        let stale = {
            let mut state = self.inner.state.lock();
            if state.accepts(generation) && state.observer.is_none() {
                state.observer = Some(observer);
                None
            } else {
                Some(observer)
            }
        };
        drop(stale);
        Ok(())
    }

    /// Returns a copy of the local value.
    pub fn value(&self) -> Value {
        self.inner.local.get()
    }

    /// Returns a handle to the local cell.
    pub fn local(&self) -> Observed {
        self.inner.local.clone()
    }

    /// Edits the local value; a deep change is written back.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        self.inner.local.edit(f)
    }

    /// Assigns the local value; a deep change is written back.
    pub fn set(&self, value: Value) {
        self.inner.local.set(value);
    }

    /// Returns the value readers see: the data, or `{id, data}` when the
    /// mirror provides ids.
    pub fn read(&self) -> Value {
        let (id, provide_id) = {
            let state = self.inner.state.lock();
            (state.doc.document_id.clone(), state.options.provide_id)
        };
        project(id.as_deref(), self.value(), provide_id)
    }

    /// Returns the last remote-consistent value.
    pub fn shadow(&self) -> Value {
        self.inner.state.lock().doc.remote_shadow.clone()
    }

    /// Returns the followed path.
    pub fn path(&self) -> Option<DocumentPath> {
        self.inner.state.lock().path.clone()
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> MirrorStatus {
        self.inner.state.lock().status
    }

    /// Returns true if the last snapshot saw an existing document.
    pub fn exists(&self) -> bool {
        self.inner.state.lock().doc.exists
    }

    /// Returns the id of the mirrored document, once known.
    pub fn document_id(&self) -> Option<String> {
        self.inner.state.lock().doc.document_id.clone()
    }

    /// Returns the metadata of the last applied snapshot.
    pub fn metadata(&self) -> SnapshotMetadata {
        self.inner.state.lock().doc.metadata
    }

    /// Returns the last feed or write failure.
    pub fn last_error(&self) -> Option<MirrorError> {
        self.inner.state.lock().doc.last_error.clone()
    }

    /// Returns true until the first snapshot was applied.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().doc.is_loading
    }

    /// Returns the number of writes whose echo is still expected.
    pub fn pending_remote_skips(&self) -> u32 {
        self.inner.state.lock().doc.pending_remote_skips
    }

    /// Returns true if a local observer is attached.
    pub fn is_observing(&self) -> bool {
        self.inner
            .state
            .lock()
            .observer
            .as_ref()
            .is_some_and(ObserverHandle::is_attached)
    }

    /// Returns the mirror's options.
    pub fn options(&self) -> MirrorOptions {
        self.inner.state.lock().options.clone()
    }

    /// Returns true if both handles refer to the same mirror.
    pub fn ptr_eq(&self, other: &EntityMirror) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl EntityInner {
    fn attach_observer(self: &Arc<Self>, generation: u64) -> ObserverHandle {
        let weak = Arc::downgrade(self);
        self.local.observe(move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_local_change(generation, value);
            }
        })
    }

    fn handle_snapshot(&self, generation: u64, snapshot: Snapshot) {
        let hook = {
            let state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            state.options.on_download.clone()
        };
        if let Some(hook) = hook {
            hook(&snapshot);
        }

        let doc = match snapshot {
            Snapshot::Document(doc) => doc,
            Snapshot::Query(_) => {
                warn!("document mirror received a query snapshot");
                return;
            }
        };

        let decision = {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            let decision = state.doc.on_remote(&doc);
            if matches!(decision, RemoteDecision::Apply(_)) {
                state.status = MirrorStatus::Active;
            }
            decision
        };
        match decision {
            RemoteDecision::SkipEcho => trace!(path = %doc.path, "skipped echo of local write"),
            RemoteDecision::IgnorePending => {
                trace!(path = %doc.path, "ignored snapshot with pending writes")
            }
            RemoteDecision::Apply(data) => {
                trace!(path = %doc.path, exists = doc.exists(), "applying remote snapshot");
                self.local.replace(data);
            }
        }
    }

    fn handle_local_change(self: &Arc<Self>, generation: u64, value: &Value) {
        let (baseline, options, path) = {
            let mut state = self.state.lock();
            if !state.accepts(generation) || !state.status.is_live() {
                return;
            }
            let Some(path) = state.path.clone() else {
                return;
            };
            match state.doc.on_local(value) {
                LocalDecision::Suppressed => {
                    trace!(path = %path, "suppressed reaction to remote overwrite");
                    return;
                }
                LocalDecision::Changed { baseline } => (baseline, state.options.clone(), path),
            }
        };

        let patch = match build_payload(&baseline, value, &options) {
            Ok(patch) => patch,
            Err(err) => {
                debug!(path = %path, error = %err, "local value not written");
                return;
            }
        };
        if options.read_only {
            trace!(path = %path, "read-only mirror, write skipped");
            return;
        }
        if patch.is_empty() {
            trace!(path = %path, "no changed fields to write");
            return;
        }

        {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            state.doc.pending_remote_skips += 1;
        }
        if let Some(hook) = &options.on_update {
            hook(&path, &patch);
        }
        debug!(path = %path, fields = patch.len(), "writing local change");

        let weak = Arc::downgrade(self);
        let target = path.clone();
        self.store.update(
            &path,
            patch,
            Box::new(move |result: StoreResult<()>| {
                if let Err(source) = result {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_write_failure(generation, &target, source);
                    }
                }
            }),
        );
    }

    fn handle_write_failure(&self, generation: u64, path: &DocumentPath, source: StoreError) {
        let error = MirrorError::write(path.as_str(), source);
        warn!(path = %path, error = %error, "write failed");
        let hook = {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            state.doc.release_skip();
            state.doc.last_error = Some(error.clone());
            state.options.on_error.clone()
        };
        if let Some(hook) = hook {
            hook(&error);
        }
    }

    fn handle_feed_error(&self, generation: u64, source: StoreError) {
        let path = {
            let state = self.state.lock();
            state
                .path
                .as_ref()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default()
        };
        self.record_feed_failure(generation, MirrorError::subscription(path, source));
    }

    fn record_feed_failure(&self, generation: u64, error: MirrorError) {
        warn!(error = %error, "document feed failed");
        let clear = {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            state.status = MirrorStatus::Errored;
            state.doc.fail(error)
        };
        if clear {
            self.local.replace(Value::Null);
        }
    }
}

impl fmt::Debug for EntityMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EntityMirror")
            .field("path", &state.path)
            .field("status", &state.status)
            .field("pending_remote_skips", &state.doc.pending_remote_skips)
            .field("options", &state.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_store::MemoryStore;

    fn path(p: &str) -> DocumentPath {
        DocumentPath::parse(p).unwrap()
    }

    fn name(value: &str) -> Value {
        Value::map([("name", Value::from(value))])
    }

    #[test]
    fn initial_snapshot_is_not_written_back() {
        let store = Arc::new(MemoryStore::new());
        store.set("users/alice", name("A")).unwrap();

        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(path("users/alice")).unwrap();

        assert_eq!(mirror.value(), name("A"));
        assert_eq!(mirror.status(), MirrorStatus::Active);
        assert!(!mirror.is_loading());
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn local_edit_writes_and_echo_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.set("users/alice", name("A")).unwrap();
        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(path("users/alice")).unwrap();

        mirror.set(name("B"));

        assert_eq!(store.update_count(), 1);
        assert_eq!(store.get("users/alice"), Some(name("B")));
        assert_eq!(mirror.pending_remote_skips(), 0);
        assert_eq!(mirror.value(), name("B"));
        assert_eq!(mirror.shadow(), name("B"));
    }

    #[test]
    fn missing_document_yields_null() {
        let store = Arc::new(MemoryStore::new());
        let mirror = EntityMirror::new(store, MirrorOptions::new());
        mirror.open(path("users/ghost")).unwrap();

        assert_eq!(mirror.value(), Value::Null);
        assert!(!mirror.exists());
        assert_eq!(mirror.document_id().as_deref(), Some("ghost"));
    }

    #[test]
    fn open_same_path_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(path("users/alice")).unwrap();
        mirror.open(path("users/alice")).unwrap();
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(store.active_subscriptions(), 1);
    }

    #[test]
    fn reopen_switches_feed() {
        let store = Arc::new(MemoryStore::new());
        store.set("users/alice", name("A")).unwrap();
        store.set("users/bob", name("B")).unwrap();
        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());

        mirror.open(path("users/alice")).unwrap();
        mirror.open(path("users/bob")).unwrap();

        assert_eq!(mirror.value(), name("B"));
        assert_eq!(store.active_subscriptions(), 1);
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn closed_mirror_cannot_reopen() {
        let store = Arc::new(MemoryStore::new());
        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(path("users/alice")).unwrap();

        assert!(mirror.close());
        assert!(!mirror.close());
        assert_eq!(store.active_subscriptions(), 0);
        assert!(!mirror.is_observing());
        assert_eq!(
            mirror.open(path("users/alice")),
            Err(MirrorError::Disposed)
        );
    }

    #[test]
    fn non_map_value_is_not_written() {
        let store = Arc::new(MemoryStore::new());
        store.set("users/alice", name("A")).unwrap();
        let mirror = EntityMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(path("users/alice")).unwrap();

        mirror.set(Value::from(42));

        assert_eq!(store.update_count(), 0);
        assert_eq!(mirror.pending_remote_skips(), 0);
    }
}
