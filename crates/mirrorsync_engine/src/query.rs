//! Mirror of a query result set.
//!
//! Each document in the result is a member with its own [`MirrorState`]
//! and local observer. Membership follows the classified changes of the
//! feed: added documents are seeded, modified ones run the document
//! protocol, removed ones are detached and dropped. Result order follows
//! the order of the latest snapshot.

use crate::config::{EchoGranularity, MirrorOptions};
use crate::error::{MirrorError, MirrorResult};
use crate::observe::{ObserverHandle, Observed};
use crate::state::{build_payload, project, LocalDecision, MirrorState, MirrorStatus, RemoteDecision};
use mirrorsync_store::{
    ChangeKind, DocumentPath, DocumentSnapshot, DocumentStore, ErrorHandler, QuerySpec, Reference,
    Snapshot, SnapshotHandler, SnapshotMetadata, StoreError, StoreResult, Subscription,
};
use mirrorsync_value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One member of a query result, as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorItem {
    /// Document id.
    pub id: String,
    /// Local copy of the document data.
    pub data: Value,
}

/// Keeps local copies of every document matching a query in two-way sync.
///
/// Cloning yields another handle to the same mirror.
#[derive(Clone)]
pub struct QueryMirror {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    store: Arc<dyn DocumentStore>,
    state: Mutex<QueryState>,
}

struct Member {
    doc: MirrorState,
    path: DocumentPath,
    observer: Option<ObserverHandle>,
}

struct QueryState {
    options: MirrorOptions,
    spec: Option<QuerySpec>,
    status: MirrorStatus,
    generation: u64,
    is_loading: bool,
    last_error: Option<MirrorError>,
    metadata: SnapshotMetadata,
    member_ids: Vec<String>,
    members: HashMap<String, Member>,
    /// In-flight writes under [`EchoGranularity::Batch`].
    pending_batch_skips: u32,
    subscription: Option<Subscription>,
}

impl QueryState {
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.status.is_disposed()
    }

    /// Detaches the member's observer, then drops the member.
    fn remove_member(&mut self, id: &str) -> bool {
        if let Some(member) = self.members.get_mut(id) {
            if let Some(mut observer) = member.observer.take() {
                observer.detach();
            }
        }
        self.members.remove(id).is_some()
    }

    fn clear_members(&mut self) {
        let ids: Vec<String> = self.members.keys().cloned().collect();
        for id in ids {
            self.remove_member(&id);
        }
        self.member_ids.clear();
    }

    /// Rebuilds the member order from the snapshot order.
    fn reorder(&mut self, docs: &[DocumentSnapshot]) {
        let mut order: Vec<String> = docs
            .iter()
            .map(|doc| doc.id().to_string())
            .filter(|id| self.members.contains_key(id))
            .collect();
        for id in &self.member_ids {
            if self.members.contains_key(id) && !order.contains(id) {
                order.push(id.clone());
            }
        }
        self.member_ids = order;
    }

    fn member_cells(&self) -> Vec<(String, Observed)> {
        self.member_ids
            .iter()
            .filter_map(|id| {
                self.members
                    .get(id)
                    .map(|member| (id.clone(), member.doc.local.clone()))
            })
            .collect()
    }
}

impl QueryMirror {
    /// Creates an unopened mirror.
    pub fn new(store: Arc<dyn DocumentStore>, options: MirrorOptions) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                store,
                state: Mutex::new(QueryState {
                    options,
                    spec: None,
                    status: MirrorStatus::Uninitialized,
                    generation: 0,
                    is_loading: true,
                    last_error: None,
                    metadata: SnapshotMetadata::default(),
                    member_ids: Vec::new(),
                    members: HashMap::new(),
                    pending_batch_skips: 0,
                    subscription: None,
                }),
            }),
        }
    }

    /// Starts following the query.
    ///
    /// Any previous feed is detached and every member dropped first.
    /// Opening an equivalent query that is already followed does nothing.
    pub fn open(&self, spec: QuerySpec) -> MirrorResult<()> {
        let (generation, previous) = {
            let mut state = self.inner.state.lock();
            if state.status.is_disposed() {
                return Err(MirrorError::Disposed);
            }
            let following = matches!(
                state.status,
                MirrorStatus::Subscribed | MirrorStatus::Active
            );
            let same = state
                .spec
                .as_ref()
                .is_some_and(|current| current.canonical() == spec.canonical());
            if following && same {
                return Ok(());
            }
            state.generation += 1;
            let previous = state.subscription.take();
            state.clear_members();
            state.spec = Some(spec.clone());
            state.status = MirrorStatus::Subscribed;
            state.is_loading = true;
            state.last_error = None;
            state.metadata = SnapshotMetadata::default();
            state.pending_batch_skips = 0;
            (state.generation, previous)
        };
        drop(previous);
        let reference = Reference::Query(spec);
        debug!(query = %reference, "opening query mirror");

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
                let error = MirrorError::subscription(reference.key().as_str(), source);
                self.inner.record_feed_failure(generation, error.clone());
                Err(error)
            }
        }
    }

    /// Detaches the feed and every member for good.
    ///
    /// Returns false if the mirror was already closed.
    pub fn close(&self) -> bool {
        let subscription = {
            let mut state = self.inner.state.lock();
            if state.status.is_disposed() {
                return false;
            }
            state.status = MirrorStatus::Disposed;
            state.generation += 1;
            state.clear_members();
            state.subscription.take()
        };
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }
        debug!("closed query mirror");
        true
    }

    /// Replaces every member observer with a fresh one, optionally
    /// installing new options. The feed stays attached.
    pub fn reattach(&self, options: Option<MirrorOptions>) -> MirrorResult<()> {
        let mut state = self.inner.state.lock();
        if state.status.is_disposed() {
            return Err(MirrorError::Disposed);
        }
        if let Some(options) = options {
            state.options = options;
        }
        let generation = state.generation;
        for (id, member) in state.members.iter_mut() {
            if let Some(mut observer) = member.observer.take() {
                observer.detach();
            }
            member.doc.suppress_next_local_reaction = false;
            member.observer =
                Some(self.inner.attach_member_observer(&member.doc.local, generation, id.clone()));
        }
        Ok(())
    }

    /// Returns the member ids in result order.
    pub fn member_ids(&self) -> Vec<String> {
        self.inner.state.lock().member_ids.clone()
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.inner.state.lock().member_ids.len()
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every member with its local data, in result order.
    pub fn items(&self) -> Vec<MirrorItem> {
        let cells = self.inner.state.lock().member_cells();
        cells
            .into_iter()
            .map(|(id, cell)| MirrorItem {
                id,
                data: cell.get(),
            })
            .collect()
    }

    /// Returns the local data of every member, in result order.
    pub fn values(&self) -> Vec<Value> {
        self.items().into_iter().map(|item| item.data).collect()
    }

    /// Returns the array readers see; each element is the data, or
    /// `{id, data}` when the mirror provides ids.
    pub fn read(&self) -> Value {
        let provide_id = self.inner.state.lock().options.provide_id;
        Value::Array(
            self.items()
                .into_iter()
                .map(|item| project(Some(&item.id), item.data, provide_id))
                .collect(),
        )
    }

    /// Returns a copy of one member's local data.
    pub fn member(&self, id: &str) -> Option<Value> {
        self.member_cell(id).map(|cell| cell.get())
    }

    /// Returns a handle to one member's local cell.
    pub fn member_cell(&self, id: &str) -> Option<Observed> {
        self.inner
            .state
            .lock()
            .members
            .get(id)
            .map(|member| member.doc.local.clone())
    }

    /// Returns one member's last remote-consistent value.
    pub fn member_shadow(&self, id: &str) -> Option<Value> {
        self.inner
            .state
            .lock()
            .members
            .get(id)
            .map(|member| member.doc.remote_shadow.clone())
    }

    /// Edits one member; a deep change is written back.
    pub fn edit_member<R>(&self, id: &str, f: impl FnOnce(&mut Value) -> R) -> MirrorResult<R> {
        let cell = self
            .member_cell(id)
            .ok_or_else(|| MirrorError::UnknownMember { id: id.to_string() })?;
        Ok(cell.edit(f))
    }

    /// Assigns one member's data; a deep change is written back.
    pub fn set_member(&self, id: &str, value: Value) -> MirrorResult<()> {
        self.edit_member(id, move |current| *current = value)
    }

    /// Returns the in-flight write count of one member.
    pub fn member_pending_skips(&self, id: &str) -> Option<u32> {
        self.inner
            .state
            .lock()
            .members
            .get(id)
            .map(|member| member.doc.pending_remote_skips)
    }

    /// Returns the last write failure of one member.
    pub fn member_error(&self, id: &str) -> Option<MirrorError> {
        self.inner
            .state
            .lock()
            .members
            .get(id)
            .and_then(|member| member.doc.last_error.clone())
    }

    /// Returns the in-flight write count under batch echo matching.
    pub fn pending_batch_skips(&self) -> u32 {
        self.inner.state.lock().pending_batch_skips
    }

    /// Returns the number of members with an attached observer.
    pub fn observed_members(&self) -> usize {
        self.inner
            .state
            .lock()
            .members
            .values()
            .filter(|member| {
                member
                    .observer
                    .as_ref()
                    .is_some_and(ObserverHandle::is_attached)
            })
            .count()
    }

    /// Returns the followed query.
    pub fn spec(&self) -> Option<QuerySpec> {
        self.inner.state.lock().spec.clone()
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> MirrorStatus {
        self.inner.state.lock().status
    }

    /// Returns true until the first snapshot was applied.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    /// Returns the last feed or write failure.
    pub fn last_error(&self) -> Option<MirrorError> {
        self.inner.state.lock().last_error.clone()
    }

    /// Returns the metadata of the last applied snapshot.
    pub fn metadata(&self) -> SnapshotMetadata {
        self.inner.state.lock().metadata
    }

    /// Returns the mirror's options.
    pub fn options(&self) -> MirrorOptions {
        self.inner.state.lock().options.clone()
    }

    /// Returns true if both handles refer to the same mirror.
    pub fn ptr_eq(&self, other: &QueryMirror) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl QueryInner {
    fn attach_member_observer(
        self: &Arc<Self>,
        cell: &Observed,
        generation: u64,
        id: String,
    ) -> ObserverHandle {
        let weak = Arc::downgrade(self);
        cell.observe(move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_member_change(generation, &id, value);
            }
        })
    }

    fn seed_member(self: &Arc<Self>, state: &mut QueryState, generation: u64, doc: &DocumentSnapshot) {
        let id = doc.id().to_string();
        let seeded = MirrorState::seeded(doc);
        let observer = self.attach_member_observer(&seeded.local, generation, id.clone());
        trace!(path = %doc.path, "member added");
        state.members.insert(
            id,
            Member {
                doc: seeded,
                path: doc.path.clone(),
                observer: Some(observer),
            },
        );
    }

    fn handle_snapshot(self: &Arc<Self>, generation: u64, snapshot: Snapshot) {
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

        let query = match snapshot {
            Snapshot::Query(query) => query,
            Snapshot::Document(_) => {
                warn!("query mirror received a document snapshot");
                return;
            }
        };

        let replacements = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.accepts(generation) {
                return;
            }
            let skip_batch = state.pending_batch_skips > 0;
            if skip_batch {
                state.pending_batch_skips -= 1;
            }

            let mut replacements = Vec::new();
            for change in &query.changes {
                let id = change.doc.id();
                match change.kind {
                    ChangeKind::Removed => {
                        if state.remove_member(id) {
                            trace!(path = %change.doc.path, "member removed");
                        }
                    }
                    ChangeKind::Added | ChangeKind::Modified => match state.members.get_mut(id) {
                        Some(_) if skip_batch => {
                            trace!(path = %change.doc.path, "skipped echo of batch write")
                        }
                        Some(member) => match member.doc.on_remote(&change.doc) {
                            RemoteDecision::Apply(data) => {
                                replacements.push((member.doc.local.clone(), data))
                            }
                            RemoteDecision::SkipEcho => {
                                trace!(path = %change.doc.path, "skipped echo of local write")
                            }
                            RemoteDecision::IgnorePending => {
                                trace!(path = %change.doc.path, "ignored change with pending writes")
                            }
                        },
                        None => self.seed_member(state, generation, &change.doc),
                    },
                }
            }

            state.reorder(&query.docs);
            state.status = MirrorStatus::Active;
            state.is_loading = false;
            state.last_error = None;
            state.metadata = query.metadata;
            replacements
        };

        for (cell, data) in replacements {
            cell.replace(data);
        }
    }

    fn handle_member_change(self: &Arc<Self>, generation: u64, id: &str, value: &Value) {
        let (baseline, options, path) = {
            let mut state = self.state.lock();
            if !state.accepts(generation) || !state.status.is_live() {
                return;
            }
            let options = state.options.clone();
            let Some(member) = state.members.get_mut(id) else {
                return;
            };
            match member.doc.on_local(value) {
                LocalDecision::Suppressed => {
                    trace!(path = %member.path, "suppressed reaction to remote overwrite");
                    return;
                }
                LocalDecision::Changed { baseline } => (baseline, options, member.path.clone()),
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

        let granularity = options.echo_granularity;
        {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            match granularity {
                EchoGranularity::Batch => state.pending_batch_skips += 1,
                EchoGranularity::Document => match state.members.get_mut(id) {
                    Some(member) => member.doc.pending_remote_skips += 1,
                    None => return,
                },
            }
        }
        if let Some(hook) = &options.on_update {
            hook(&path, &patch);
        }
        debug!(path = %path, fields = patch.len(), "writing member change");

        let weak = Arc::downgrade(self);
        let member_id = id.to_string();
        let target = path.clone();
        self.store.update(
            &path,
            patch,
            Box::new(move |result: StoreResult<()>| {
                if let Err(source) = result {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_write_failure(generation, &member_id, &target, granularity, source);
                    }
                }
            }),
        );
    }

    fn handle_write_failure(
        &self,
        generation: u64,
        id: &str,
        path: &DocumentPath,
        granularity: EchoGranularity,
        source: StoreError,
    ) {
        let error = MirrorError::write(path.as_str(), source);
        warn!(path = %path, error = %error, "write failed");
        let hook = {
            let mut state = self.state.lock();
            if !state.accepts(generation) {
                return;
            }
            if granularity == EchoGranularity::Batch {
                state.pending_batch_skips = state.pending_batch_skips.saturating_sub(1);
            }
            if let Some(member) = state.members.get_mut(id) {
                if granularity == EchoGranularity::Document {
                    member.doc.release_skip();
                }
                member.doc.last_error = Some(error.clone());
            }
            state.last_error = Some(error.clone());
            state.options.on_error.clone()
        };
        if let Some(hook) = hook {
            hook(&error);
        }
    }

    fn handle_feed_error(&self, generation: u64, source: StoreError) {
        let key = {
            let state = self.state.lock();
            state
                .spec
                .as_ref()
                .map(QuerySpec::canonical)
                .unwrap_or_default()
        };
        self.record_feed_failure(generation, MirrorError::subscription(key, source));
    }

    fn record_feed_failure(&self, generation: u64, error: MirrorError) {
        warn!(error = %error, "query feed failed");
        let mut state = self.state.lock();
        if !state.accepts(generation) {
            return;
        }
        state.status = MirrorStatus::Errored;
        state.is_loading = false;
        state.last_error = Some(error);
        state.clear_members();
    }
}

impl fmt::Debug for QueryMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("QueryMirror")
            .field("spec", &state.spec)
            .field("status", &state.status)
            .field("members", &state.member_ids)
            .field("options", &state.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_store::{CollectionPath, MemoryStore};

    fn users() -> QuerySpec {
        QuerySpec::new(CollectionPath::parse("users").unwrap())
    }

    fn name(value: &str) -> Value {
        Value::map([("name", Value::from(value))])
    }

    fn store_with_users() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set("users/a", name("A")).unwrap();
        store.set("users/b", name("B")).unwrap();
        store
    }

    #[test]
    fn initial_result_seeds_members() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(users()).unwrap();

        assert_eq!(mirror.member_ids(), vec!["a", "b"]);
        assert_eq!(mirror.member("a"), Some(name("A")));
        assert_eq!(mirror.observed_members(), 2);
        assert_eq!(mirror.status(), MirrorStatus::Active);
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn added_and_removed_documents() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(users()).unwrap();

        store.set("users/c", name("C")).unwrap();
        assert_eq!(mirror.member_ids(), vec!["a", "b", "c"]);

        let cell = mirror.member_cell("a").unwrap();
        store.delete("users/a").unwrap();
        assert_eq!(mirror.member_ids(), vec!["b", "c"]);
        assert_eq!(cell.observer_count(), 0);
        assert_eq!(mirror.member("a"), None);
    }

    #[test]
    fn remote_modification_is_not_written_back() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(users()).unwrap();

        store.set("users/b", name("B2")).unwrap();

        assert_eq!(mirror.member("b"), Some(name("B2")));
        assert_eq!(mirror.member_shadow("b"), Some(name("B2")));
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn member_edit_writes_document() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(users()).unwrap();

        mirror.set_member("a", name("A2")).unwrap();

        assert_eq!(store.update_count(), 1);
        assert_eq!(store.get("users/a"), Some(name("A2")));
        assert_eq!(mirror.member_pending_skips("a"), Some(0));
        assert_eq!(mirror.member("a"), Some(name("A2")));
    }

    #[test]
    fn unknown_member_edit_fails() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store, MirrorOptions::new());
        mirror.open(users()).unwrap();

        let err = mirror.set_member("zed", name("Z")).unwrap_err();
        assert_eq!(err, MirrorError::UnknownMember { id: "zed".into() });
    }

    #[test]
    fn close_detaches_members() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store.clone(), MirrorOptions::new());
        mirror.open(users()).unwrap();
        let cell = mirror.member_cell("a").unwrap();

        assert!(mirror.close());
        assert!(!mirror.close());
        assert_eq!(cell.observer_count(), 0);
        assert!(mirror.is_empty());
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[test]
    fn read_projects_ids() {
        let store = store_with_users();
        let mirror = QueryMirror::new(store, MirrorOptions::new().with_provide_id(true));
        mirror.open(users()).unwrap();

        let read = mirror.read();
        let items = read.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("id"), Some(&Value::from("a")));
        assert_eq!(items[0].get("data"), Some(&name("A")));
    }
}
