//! In-process document store.
//!
//! [`MemoryStore`] keeps documents in memory and runs change feeds for
//! documents and simple queries. It is used by tests and by the replay tool,
//! and doubles as a reference for the behaviour the mirrors expect from a
//! real store client:
//!
//! - every subscription gets an initial snapshot
//! - every write produces exactly one event per affected subscription
//! - query events classify changes as added / modified / removed
//! - write outcomes arrive through the completion callback
//!
//! With [`Delivery::Manual`], events and write outcomes are queued until
//! [`MemoryStore::deliver_pending`] is called, which lets tests hold writes
//! "in flight".

use crate::error::{StoreError, StoreResult};
use crate::reference::{CollectionPath, DocumentPath, QuerySpec, Reference};
use crate::snapshot::{
    ChangeKind, DocumentChange, DocumentSnapshot, QuerySnapshot, Snapshot, SnapshotMetadata,
};
use crate::store::{DocumentStore, ErrorHandler, SnapshotHandler, Subscription, WriteCallback};
use mirrorsync_value::{deep_equal, Patch, Value};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// When queued events are handed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Events are delivered before the triggering call returns.
    #[default]
    Immediate,
    /// Events wait until [`MemoryStore::deliver_pending`] is called.
    Manual,
}

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreConfig {
    /// Delivery mode.
    pub delivery: Delivery,
}

impl MemoryStoreConfig {
    /// Creates the default configuration (immediate delivery).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delivery mode.
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

struct Listener {
    reference: Reference,
    on_snapshot: SnapshotHandler,
    on_error: ErrorHandler,
    active: Arc<AtomicBool>,
    /// Last result set delivered to a query listener.
    results: Vec<(DocumentPath, Value)>,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<DocumentPath, Value>,
    listeners: BTreeMap<u64, Listener>,
    next_listener_id: u64,
    failing_updates: VecDeque<StoreError>,
}

enum Dispatch {
    Snapshot {
        active: Arc<AtomicBool>,
        handler: SnapshotHandler,
        snapshot: Snapshot,
    },
    Error {
        active: Arc<AtomicBool>,
        handler: ErrorHandler,
        error: StoreError,
    },
    Write {
        callback: WriteCallback,
        result: StoreResult<()>,
    },
}

impl Dispatch {
    fn run(self) {
        match self {
            Dispatch::Snapshot {
                active,
                handler,
                snapshot,
            } => {
                if active.load(Ordering::SeqCst) {
                    handler(snapshot);
                }
            }
            Dispatch::Error {
                active,
                handler,
                error,
            } => {
                if active.load(Ordering::SeqCst) {
                    handler(error);
                }
            }
            Dispatch::Write { callback, result } => callback(result),
        }
    }
}

/// An in-memory [`DocumentStore`].
pub struct MemoryStore {
    config: MemoryStoreConfig,
    state: Arc<Mutex<StoreState>>,
    queue: Mutex<VecDeque<Dispatch>>,
    update_count: AtomicU64,
    subscription_count: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store with immediate delivery.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(StoreState::default())),
            queue: Mutex::new(VecDeque::new()),
            update_count: AtomicU64::new(0),
            subscription_count: AtomicU64::new(0),
        }
    }

    /// Creates an empty store that queues events until delivered.
    pub fn manual() -> Self {
        Self::with_config(MemoryStoreConfig::new().with_delivery(Delivery::Manual))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Writes a whole document on behalf of another client.
    pub fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        self.write_external(path, value, SnapshotMetadata::confirmed())
    }

    /// Writes a whole document as an unconfirmed local write.
    ///
    /// Subscribers see the change with `has_pending_writes` set, the way a
    /// store client reports writes it has not yet confirmed with the service.
    pub fn set_with_pending_writes(&self, path: &str, value: Value) -> StoreResult<()> {
        self.write_external(path, value, SnapshotMetadata::pending())
    }

    /// Merges a patch into an existing document on behalf of another client.
    pub fn merge(&self, path: &str, patch: &Patch) -> StoreResult<()> {
        let path = DocumentPath::parse(path)?;
        let events = {
            let mut state = self.state.lock();
            let doc = state
                .documents
                .get_mut(&path)
                .ok_or_else(|| StoreError::not_found(path.as_str()))?;
            patch.apply_to(doc);
            collect_events(&mut state, &path, SnapshotMetadata::confirmed())
        };
        self.enqueue(events);
        Ok(())
    }

    /// Deletes a document. Returns true if it existed.
    pub fn delete(&self, path: &str) -> StoreResult<bool> {
        let path = DocumentPath::parse(path)?;
        let (existed, events) = {
            let mut state = self.state.lock();
            let existed = state.documents.remove(&path).is_some();
            let events = if existed {
                collect_events(&mut state, &path, SnapshotMetadata::confirmed())
            } else {
                Vec::new()
            };
            (existed, events)
        };
        self.enqueue(events);
        Ok(existed)
    }

    /// Adds a document with a generated identifier to a collection.
    pub fn add(&self, collection: &str, value: Value) -> StoreResult<DocumentPath> {
        let collection = CollectionPath::parse(collection)?;
        let path = collection.doc(&uuid::Uuid::new_v4().simple().to_string())?;
        self.set(path.as_str(), value)?;
        Ok(path)
    }

    /// Returns a copy of a document's data.
    pub fn get(&self, path: &str) -> Option<Value> {
        let path = DocumentPath::parse(path).ok()?;
        self.state.lock().documents.get(&path).cloned()
    }

    /// Returns a copy of every stored document, ordered by path.
    pub fn documents(&self) -> BTreeMap<DocumentPath, Value> {
        self.state.lock().documents.clone()
    }

    /// Returns the number of stored documents.
    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Makes the next call to [`DocumentStore::update`] fail with `error`.
    ///
    /// Calls queue up: arming twice fails the next two updates.
    pub fn fail_next_update(&self, error: StoreError) {
        self.state.lock().failing_updates.push_back(error);
    }

    /// Terminates every live feed of `reference` with `error`.
    ///
    /// Returns the number of feeds terminated. Terminated feeds deliver the
    /// error once and nothing afterwards.
    pub fn fail_subscriptions(&self, reference: &Reference, error: StoreError) -> usize {
        let key = reference.key();
        let events: Vec<Dispatch> = {
            let mut state = self.state.lock();
            let ids: Vec<u64> = state
                .listeners
                .iter()
                .filter(|(_, l)| l.reference.key() == key)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.listeners.remove(&id))
                .map(|listener| Dispatch::Error {
                    active: listener.active,
                    handler: listener.on_error,
                    error: error.clone(),
                })
                .collect()
        };
        let failed = events.len();
        debug!(reference = %key, failed, "terminating subscriptions");
        self.enqueue(events);
        failed
    }

    /// Delivers queued events and write outcomes in order.
    ///
    /// Returns the number of items delivered, including items queued by the
    /// handlers themselves while delivery was running.
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(dispatch) => {
                    dispatch.run();
                    delivered += 1;
                }
                None => break,
            }
        }
        if delivered > 0 {
            trace!(delivered, "delivered queued events");
        }
        delivered
    }

    /// Returns the number of queued, undelivered items.
    pub fn pending_deliveries(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns the number of update calls received.
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Returns the number of subscriptions ever opened.
    pub fn subscription_count(&self) -> u64 {
        self.subscription_count.load(Ordering::SeqCst)
    }

    /// Returns the number of subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.state
            .lock()
            .listeners
            .values()
            .filter(|l| l.active.load(Ordering::SeqCst))
            .count()
    }

    fn write_external(&self, path: &str, value: Value, metadata: SnapshotMetadata) -> StoreResult<()> {
        let path = DocumentPath::parse(path)?;
        if !value.is_map() {
            return Err(StoreError::Rejected(format!(
                "document data must be a map, found {}",
                value.kind()
            )));
        }
        let events = {
            let mut state = self.state.lock();
            state.documents.insert(path.clone(), value);
            collect_events(&mut state, &path, metadata)
        };
        self.enqueue(events);
        Ok(())
    }

    fn enqueue(&self, items: Vec<Dispatch>) {
        if items.is_empty() {
            return;
        }
        self.queue.lock().extend(items);
        if self.config.delivery == Delivery::Immediate {
            self.deliver_pending();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(
        &self,
        reference: &Reference,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> StoreResult<Subscription> {
        let active = Arc::new(AtomicBool::new(true));
        let (id, initial) = {
            let mut state = self.state.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;

            let (snapshot, results) = match reference {
                Reference::Document(path) => (
                    Snapshot::Document(document_snapshot(
                        &state.documents,
                        path,
                        SnapshotMetadata::confirmed(),
                    )),
                    Vec::new(),
                ),
                Reference::Query(spec) => {
                    let results = run_query(&state.documents, spec);
                    let changes = classify_changes(&[], &results, None, SnapshotMetadata::confirmed());
                    (
                        Snapshot::Query(query_snapshot(&results, changes, SnapshotMetadata::confirmed())),
                        results,
                    )
                }
            };

            state.listeners.insert(
                id,
                Listener {
                    reference: reference.clone(),
                    on_snapshot: Arc::clone(&on_snapshot),
                    on_error,
                    active: Arc::clone(&active),
                    results,
                },
            );

            let initial = Dispatch::Snapshot {
                active: Arc::clone(&active),
                handler: on_snapshot,
                snapshot,
            };
            (id, initial)
        };

        self.subscription_count.fetch_add(1, Ordering::SeqCst);
        debug!(reference = %reference, listener = id, "subscribed");
        self.enqueue(vec![initial]);

        let state: Weak<Mutex<StoreState>> = Arc::downgrade(&self.state);
        Ok(Subscription::new(move || {
            active.store(false, Ordering::SeqCst);
            if let Some(state) = state.upgrade() {
                state.lock().listeners.remove(&id);
            }
            debug!(listener = id, "unsubscribed");
        }))
    }

    fn update(&self, path: &DocumentPath, patch: Patch, on_complete: WriteCallback) {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        let items = {
            let mut state = self.state.lock();
            let result = match state.failing_updates.pop_front() {
                Some(error) => Err(error),
                None => match state.documents.get_mut(path) {
                    Some(doc) => {
                        patch.apply_to(doc);
                        Ok(())
                    }
                    None => Err(StoreError::not_found(path.as_str())),
                },
            };
            let mut items = if result.is_ok() {
                collect_events(&mut state, path, SnapshotMetadata::confirmed())
            } else {
                Vec::new()
            };
            trace!(path = %path, fields = patch.len(), ok = result.is_ok(), "update");
            items.push(Dispatch::Write {
                callback: on_complete,
                result,
            });
            items
        };
        self.enqueue(items);
    }
}

/// Builds one event per listener affected by a change of `path`.
///
/// Document listeners of `path` always get an event. Query listeners over
/// the parent collection get an event when their result set changed; the
/// touched document counts as modified even if its data is unchanged, so
/// that every write yields exactly one echo.
fn collect_events(
    state: &mut StoreState,
    path: &DocumentPath,
    metadata: SnapshotMetadata,
) -> Vec<Dispatch> {
    let StoreState {
        documents,
        listeners,
        ..
    } = state;
    let collection = path.parent();
    let mut events = Vec::new();

    for listener in listeners.values_mut() {
        if !listener.active.load(Ordering::SeqCst) {
            continue;
        }
        let snapshot = match &listener.reference {
            Reference::Document(watched) if watched == path => {
                Snapshot::Document(document_snapshot(documents, path, metadata))
            }
            Reference::Query(spec) if spec.collection == collection => {
                let results = run_query(documents, spec);
                let changes = classify_changes(&listener.results, &results, Some(path), metadata);
                if changes.is_empty() {
                    continue;
                }
                let snapshot = query_snapshot(&results, changes, metadata);
                listener.results = results;
                Snapshot::Query(snapshot)
            }
            _ => continue,
        };
        events.push(Dispatch::Snapshot {
            active: Arc::clone(&listener.active),
            handler: Arc::clone(&listener.on_snapshot),
            snapshot,
        });
    }
    events
}

fn document_snapshot(
    documents: &BTreeMap<DocumentPath, Value>,
    path: &DocumentPath,
    metadata: SnapshotMetadata,
) -> DocumentSnapshot {
    match documents.get(path) {
        Some(data) => DocumentSnapshot::existing(path.clone(), data.clone(), metadata),
        None => DocumentSnapshot::missing(path.clone(), metadata),
    }
}

fn query_snapshot(
    results: &[(DocumentPath, Value)],
    changes: Vec<DocumentChange>,
    metadata: SnapshotMetadata,
) -> QuerySnapshot {
    let docs = results
        .iter()
        .map(|(path, data)| {
            let doc_metadata = changes
                .iter()
                .find(|c| &c.doc.path == path)
                .map(|c| c.doc.metadata)
                .unwrap_or_default();
            DocumentSnapshot::existing(path.clone(), data.clone(), doc_metadata)
        })
        .collect();
    QuerySnapshot {
        docs,
        changes,
        metadata,
    }
}

/// Evaluates a query: collection scan, equality filters, ordering, limit.
///
/// Documents missing an ordering field are excluded, as are documents whose
/// filtered field is missing.
fn run_query(documents: &BTreeMap<DocumentPath, Value>, spec: &QuerySpec) -> Vec<(DocumentPath, Value)> {
    let mut results: Vec<(DocumentPath, Value)> = documents
        .iter()
        .filter(|(path, _)| path.parent() == spec.collection)
        .filter(|(_, data)| {
            spec.filters.iter().all(|filter| {
                data.pointer(filter.field.as_str())
                    .is_some_and(|v| deep_equal(v, &filter.value))
            })
        })
        .filter(|(_, data)| {
            spec.order_by
                .iter()
                .all(|order| data.pointer(order.field.as_str()).is_some())
        })
        .map(|(path, data)| (path.clone(), data.clone()))
        .collect();

    results.sort_by(|(path_a, a), (path_b, b)| {
        for order in &spec.order_by {
            let field = order.field.as_str();
            let ord = match (a.pointer(field), b.pointer(field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                _ => CmpOrdering::Equal,
            };
            let ord = match order.direction {
                crate::reference::Direction::Asc => ord,
                crate::reference::Direction::Desc => ord.reverse(),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        path_a.id().cmp(path_b.id())
    });

    if let Some(limit) = spec.limit {
        results.truncate(limit);
    }
    results
}

fn classify_changes(
    old: &[(DocumentPath, Value)],
    new: &[(DocumentPath, Value)],
    touched: Option<&DocumentPath>,
    metadata: SnapshotMetadata,
) -> Vec<DocumentChange> {
    let old_positions: HashMap<&DocumentPath, usize> =
        old.iter().enumerate().map(|(i, (p, _))| (p, i)).collect();
    let new_positions: HashMap<&DocumentPath, usize> =
        new.iter().enumerate().map(|(i, (p, _))| (p, i)).collect();
    let doc_metadata = |path: &DocumentPath| {
        if Some(path) == touched {
            metadata
        } else {
            SnapshotMetadata::confirmed()
        }
    };

    let mut changes = Vec::new();
    for (old_index, (path, data)) in old.iter().enumerate() {
        if !new_positions.contains_key(path) {
            changes.push(DocumentChange {
                kind: ChangeKind::Removed,
                doc: DocumentSnapshot::existing(path.clone(), data.clone(), doc_metadata(path)),
                old_index: Some(old_index),
                new_index: None,
            });
        }
    }
    for (new_index, (path, data)) in new.iter().enumerate() {
        let change = match old_positions.get(path) {
            None => Some((ChangeKind::Added, None)),
            Some(&old_index) => {
                let changed = !deep_equal(&old[old_index].1, data);
                (changed || Some(path) == touched).then_some((ChangeKind::Modified, Some(old_index)))
            }
        };
        if let Some((kind, old_index)) = change {
            changes.push(DocumentChange {
                kind,
                doc: DocumentSnapshot::existing(path.clone(), data.clone(), doc_metadata(path)),
                old_index,
                new_index: Some(new_index),
            });
        }
    }
    changes
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Integer(_) | Value::Float(_) => 2,
        Value::Text(_) => 3,
        Value::Bytes(_) => 4,
        Value::Array(_) => 5,
        Value::Map(_) => 6,
    }
}

/// Total order used for query ordering: by type, then by value.
fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_values(l, r))
            .find(|ord| *ord != CmpOrdering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Map(x), Value::Map(y)) => x
            .iter()
            .zip(y)
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
            .find(|ord| *ord != CmpOrdering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
