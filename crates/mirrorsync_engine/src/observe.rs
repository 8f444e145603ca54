//! Observable values.
//!
//! An [`Observed`] cell holds the caller-facing copy of a document. Mirrors
//! attach one observer to each cell; that observer turns local edits into
//! writes. Observers run after the cell's lock is released, so they may read
//! or edit the cell again.

use mirrorsync_value::{deep_equal, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with the new value after a change.
pub type ChangeHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct ObserverSlot {
    id: u64,
    active: Arc<AtomicBool>,
    handler: ChangeHandler,
}

struct ObservedInner {
    value: Mutex<Value>,
    observers: Mutex<Vec<ObserverSlot>>,
    next_id: AtomicU64,
}

/// A shared, observable document value.
///
/// Cloning yields another handle to the same cell.
#[derive(Clone)]
pub struct Observed {
    inner: Arc<ObservedInner>,
}

impl Observed {
    /// Creates a cell holding `value`.
    pub fn new(value: Value) -> Self {
        Self {
            inner: Arc::new(ObservedInner {
                value: Mutex::new(value),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns a deep copy of the current value.
    pub fn get(&self) -> Value {
        self.inner.value.lock().clone()
    }

    /// Reads the current value without copying it.
    ///
    /// The cell is locked while `f` runs, so `f` must not access this cell.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.inner.value.lock())
    }

    /// Mutates the value.
    ///
    /// `f` edits a copy that is stored when it returns; the cell is not
    /// locked meanwhile, so `f` may read it. Observers are notified once,
    /// after the copy is stored, and only if the value deeply changed.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut draft = self.get();
        let result = f(&mut draft);
        let changed = {
            let mut value = self.inner.value.lock();
            if deep_equal(&value, &draft) {
                None
            } else {
                *value = draft.clone();
                Some(draft)
            }
        };
        if let Some(value) = changed {
            self.notify(&value);
        }
        result
    }

    /// Assigns a new value, notifying observers if it deeply differs.
    pub fn set(&self, value: Value) {
        self.edit(move |current| *current = value);
    }

    /// Assigns a new value and always notifies observers.
    ///
    /// Used for overwrites that originate from the remote store: every such
    /// overwrite produces exactly one notification. Returns the old value.
    pub fn replace(&self, value: Value) -> Value {
        let old = std::mem::replace(&mut *self.inner.value.lock(), value.clone());
        self.notify(&value);
        old
    }

    /// Attaches an observer.
    pub fn observe(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> ObserverHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.inner.observers.lock().push(ObserverSlot {
            id,
            active: Arc::clone(&active),
            handler: Arc::new(handler),
        });
        ObserverHandle {
            cell: Arc::downgrade(&self.inner),
            id,
            active,
            detached: false,
        }
    }

    /// Returns the number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Detaches every observer. Returns how many were attached.
    pub fn detach_all(&self) -> usize {
        let slots = std::mem::take(&mut *self.inner.observers.lock());
        for slot in &slots {
            slot.active.store(false, Ordering::SeqCst);
        }
        slots.len()
    }

    /// Returns true if both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self, value: &Value) {
        let handlers: Vec<(Arc<AtomicBool>, ChangeHandler)> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|slot| (Arc::clone(&slot.active), Arc::clone(&slot.handler)))
            .collect();
        for (active, handler) in handlers {
            if active.load(Ordering::SeqCst) {
                handler(value);
            }
        }
    }
}

impl Default for Observed {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("value", &*self.inner.value.lock())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Detach handle of an observer.
///
/// Detaching is idempotent; dropping the handle detaches as well.
pub struct ObserverHandle {
    cell: Weak<ObservedInner>,
    id: u64,
    active: Arc<AtomicBool>,
    detached: bool,
}

impl ObserverHandle {
    /// Detaches the observer. Returns true if this call performed the detach.
    pub fn detach(&mut self) -> bool {
        if self.detached {
            return false;
        }
        self.detached = true;
        self.active.store(false, Ordering::SeqCst);
        if let Some(cell) = self.cell.upgrade() {
            cell.observers.lock().retain(|slot| slot.id != self.id);
        }
        true
    }

    /// Returns true while the observer receives notifications.
    pub fn is_attached(&self) -> bool {
        !self.detached && self.active.load(Ordering::SeqCst)
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}
