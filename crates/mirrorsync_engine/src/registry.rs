//! Registry of live mirrors.
//!
//! The registry keeps at most one mirror per [`SubscriptionKey`], so every
//! consumer of the same reference shares one feed and one local copy.
//! Dropping the registry disposes every mirror it holds.

use crate::config::{MirrorOptions, RegistryConfig};
use crate::entity::EntityMirror;
use crate::error::{MirrorError, MirrorResult};
use crate::query::QueryMirror;
use crate::state::MirrorStatus;
use mirrorsync_store::{DocumentStore, Reference, SubscriptionKey};
use mirrorsync_value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to a registered mirror.
#[derive(Clone, Debug)]
pub enum Mirror {
    /// Mirror of a single document.
    Entity(EntityMirror),
    /// Mirror of a query result set.
    Query(QueryMirror),
}

impl Mirror {
    fn create(store: Arc<dyn DocumentStore>, reference: &Reference, options: MirrorOptions) -> Self {
        match reference {
            Reference::Document(_) => Mirror::Entity(EntityMirror::new(store, options)),
            Reference::Query(_) => Mirror::Query(QueryMirror::new(store, options)),
        }
    }

    /// Opens `reference` on this mirror.
    pub fn open(&self, reference: &Reference) -> MirrorResult<()> {
        match (self, reference) {
            (Mirror::Entity(mirror), Reference::Document(path)) => mirror.open(path.clone()),
            (Mirror::Query(mirror), Reference::Query(spec)) => mirror.open(spec.clone()),
            (Mirror::Entity(_), Reference::Query(_)) => Err(MirrorError::KindMismatch {
                mirror: "document",
                reference: reference.key().to_string(),
            }),
            (Mirror::Query(_), Reference::Document(_)) => Err(MirrorError::KindMismatch {
                mirror: "query",
                reference: reference.key().to_string(),
            }),
        }
    }

    /// Closes the mirror. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        match self {
            Mirror::Entity(mirror) => mirror.close(),
            Mirror::Query(mirror) => mirror.close(),
        }
    }

    /// Re-attaches local observers, optionally installing new options.
    pub fn reattach(&self, options: Option<MirrorOptions>) -> MirrorResult<()> {
        match self {
            Mirror::Entity(mirror) => mirror.reattach(options),
            Mirror::Query(mirror) => mirror.reattach(options),
        }
    }

    /// Returns the value readers see.
    pub fn read(&self) -> Value {
        match self {
            Mirror::Entity(mirror) => mirror.read(),
            Mirror::Query(mirror) => mirror.read(),
        }
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> MirrorStatus {
        match self {
            Mirror::Entity(mirror) => mirror.status(),
            Mirror::Query(mirror) => mirror.status(),
        }
    }

    /// Returns true until the first snapshot was applied.
    pub fn is_loading(&self) -> bool {
        match self {
            Mirror::Entity(mirror) => mirror.is_loading(),
            Mirror::Query(mirror) => mirror.is_loading(),
        }
    }

    /// Returns the last feed or write failure.
    pub fn last_error(&self) -> Option<MirrorError> {
        match self {
            Mirror::Entity(mirror) => mirror.last_error(),
            Mirror::Query(mirror) => mirror.last_error(),
        }
    }

    /// Returns the document mirror, if this is one.
    pub fn as_entity(&self) -> Option<&EntityMirror> {
        match self {
            Mirror::Entity(mirror) => Some(mirror),
            Mirror::Query(_) => None,
        }
    }

    /// Returns the query mirror, if this is one.
    pub fn as_query(&self) -> Option<&QueryMirror> {
        match self {
            Mirror::Query(mirror) => Some(mirror),
            Mirror::Entity(_) => None,
        }
    }

    /// Returns true if both handles refer to the same mirror.
    pub fn ptr_eq(&self, other: &Mirror) -> bool {
        match (self, other) {
            (Mirror::Entity(a), Mirror::Entity(b)) => a.ptr_eq(b),
            (Mirror::Query(a), Mirror::Query(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Owns the mirrors of one store, keyed by subscription key.
pub struct SyncRegistry {
    store: Arc<dyn DocumentStore>,
    config: RegistryConfig,
    mirrors: Mutex<HashMap<SubscriptionKey, Mirror>>,
}

impl SyncRegistry {
    /// Creates a registry with the default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, RegistryConfig::default())
    }

    /// Creates a registry with a custom configuration.
    pub fn with_config(store: Arc<dyn DocumentStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            mirrors: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the mirror for `reference`, creating and opening it if needed.
    ///
    /// Options only apply when the mirror is created; later calls get the
    /// existing mirror unchanged. A mirror whose feed failed to open is
    /// still registered and reports the failure through its last error.
    /// A registered mirror that was closed directly is replaced by a fresh
    /// one.
    pub fn get_or_create(
        &self,
        reference: &Reference,
        options: Option<MirrorOptions>,
    ) -> Mirror {
        let key = reference.key();
        let mirror = {
            let mut mirrors = self.mirrors.lock();
            if let Some(existing) = mirrors.get(&key) {
                if !existing.status().is_disposed() {
                    return existing.clone();
                }
                debug!(key = %key, "replacing closed mirror");
                mirrors.remove(&key);
            }
            let options = options.unwrap_or_else(|| self.config.default_options.clone());
            let mirror = Mirror::create(Arc::clone(&self.store), reference, options);
            mirrors.insert(key.clone(), mirror.clone());
            mirror
        };
        debug!(key = %key, "created mirror");

        if let Err(err) = mirror.open(reference) {
            warn!(key = %key, error = %err, "mirror failed to open");
        }
        mirror
    }

    /// Returns the registered mirror for `reference`.
    pub fn get(&self, reference: &Reference) -> Option<Mirror> {
        self.mirrors.lock().get(&reference.key()).cloned()
    }

    /// Resolves an optional reference, then behaves like
    /// [`get_or_create`](Self::get_or_create).
    ///
    /// A missing reference is logged and yields `None`; nothing is created.
    pub fn mirror(&self, reference: Option<&Reference>, options: Option<MirrorOptions>) -> Option<Mirror> {
        match reference {
            Some(reference) => Some(self.get_or_create(reference, options)),
            None => {
                debug!("no reference given, nothing to mirror");
                None
            }
        }
    }

    /// Parses `path` (document or collection, by segment count) and returns
    /// its mirror.
    pub fn mirror_path(&self, path: &str, options: Option<MirrorOptions>) -> MirrorResult<Mirror> {
        let reference = Reference::parse(path).map_err(MirrorError::from)?;
        Ok(self.get_or_create(&reference, options))
    }

    /// Re-attaches the local observers of the mirror for `reference`.
    ///
    /// New options, if given, replace the old ones. The feed stays attached.
    /// Returns false if no such mirror is registered.
    pub fn reset(&self, reference: &Reference, options: Option<MirrorOptions>) -> MirrorResult<bool> {
        let Some(mirror) = self.get(reference) else {
            return Ok(false);
        };
        mirror.reattach(options)?;
        debug!(key = %reference.key(), "reset mirror observers");
        Ok(true)
    }

    /// Like [`reset`](Self::reset), for an optional reference.
    pub fn reset_mirror(
        &self,
        reference: Option<&Reference>,
        options: Option<MirrorOptions>,
    ) -> MirrorResult<bool> {
        match reference {
            Some(reference) => self.reset(reference, options),
            None => Err(MirrorError::invalid_reference("no reference given")),
        }
    }

    /// Closes and unregisters the mirror for `reference`.
    ///
    /// The mirror is detached before it leaves the registry. Returns false
    /// if no such mirror is registered.
    pub fn dispose(&self, reference: &Reference) -> bool {
        let key = reference.key();
        let Some(mirror) = self.mirrors.lock().get(&key).cloned() else {
            return false;
        };
        mirror.close();
        let removed = self
            .mirrors
            .lock()
            .remove(&key)
            .is_some_and(|registered| registered.ptr_eq(&mirror));
        debug!(key = %key, "disposed mirror");
        removed
    }

    /// Closes and unregisters every mirror. Returns how many were disposed.
    pub fn dispose_all(&self) -> usize {
        let mirrors: Vec<Mirror> = self.mirrors.lock().values().cloned().collect();
        for mirror in &mirrors {
            mirror.close();
        }
        self.mirrors.lock().clear();
        if !mirrors.is_empty() {
            debug!(count = mirrors.len(), "disposed all mirrors");
        }
        mirrors.len()
    }

    /// Returns the number of registered mirrors.
    pub fn len(&self) -> usize {
        self.mirrors.lock().len()
    }

    /// Returns true if no mirror is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every registered mirror with its key, sorted by key.
    pub fn mirrors(&self) -> Vec<(SubscriptionKey, Mirror)> {
        let mut mirrors: Vec<(SubscriptionKey, Mirror)> = self
            .mirrors
            .lock()
            .iter()
            .map(|(key, mirror)| (key.clone(), mirror.clone()))
            .collect();
        mirrors.sort_by(|a, b| a.0.cmp(&b.0));
        mirrors
    }

    /// Returns the keys of all registered mirrors, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.mirrors.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for SyncRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("mirrors", &self.keys())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_store::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, SyncRegistry) {
        let store = Arc::new(MemoryStore::new());
        store
            .set("users/alice", Value::map([("name", Value::from("Alice"))]))
            .unwrap();
        let registry = SyncRegistry::new(store.clone());
        (store, registry)
    }

    #[test]
    fn one_mirror_per_key() {
        let (store, registry) = registry();
        let reference = Reference::doc("users/alice").unwrap();

        let first = registry.get_or_create(&reference, None);
        let second = registry.get_or_create(&reference, Some(MirrorOptions::new().with_read_only(true)));

        assert!(first.ptr_eq(&second));
        assert_eq!(registry.len(), 1);
        assert_eq!(store.subscription_count(), 1);
        assert!(!second.as_entity().unwrap().options().read_only);
    }

    #[test]
    fn missing_reference_creates_nothing() {
        let (_store, registry) = registry();
        assert!(registry.mirror(None, None).is_none());
        assert!(registry.is_empty());
        assert!(registry.reset_mirror(None, None).is_err());
    }

    #[test]
    fn mirror_path_picks_kind() {
        let (_store, registry) = registry();
        assert!(registry.mirror_path("users/alice", None).unwrap().as_entity().is_some());
        assert!(registry.mirror_path("users", None).unwrap().as_query().is_some());
        assert!(matches!(
            registry.mirror_path("users//x", None),
            Err(MirrorError::InvalidReference(_))
        ));
    }

    #[test]
    fn dispose_closes_and_unregisters() {
        let (store, registry) = registry();
        let reference = Reference::doc("users/alice").unwrap();
        let mirror = registry.get_or_create(&reference, None);

        assert!(registry.dispose(&reference));
        assert!(!registry.dispose(&reference));
        assert_eq!(mirror.status(), MirrorStatus::Disposed);
        assert_eq!(store.active_subscriptions(), 0);
        assert!(registry.get(&reference).is_none());
    }

    #[test]
    fn drop_disposes_everything() {
        let (store, registry) = registry();
        registry.get_or_create(&Reference::doc("users/alice").unwrap(), None);
        registry.get_or_create(&Reference::collection("users").unwrap(), None);
        assert_eq!(store.active_subscriptions(), 2);

        drop(registry);
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[test]
    fn default_options_apply() {
        let store = Arc::new(MemoryStore::new());
        let config =
            RegistryConfig::new().with_default_options(MirrorOptions::new().with_provide_id(true));
        let registry = SyncRegistry::with_config(store, config);

        let mirror = registry.get_or_create(&Reference::doc("users/bob").unwrap(), None);
        assert!(mirror.as_entity().unwrap().options().provide_id);
    }
}
