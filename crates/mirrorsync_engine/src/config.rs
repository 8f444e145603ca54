//! Configuration for mirrors and the registry.

use crate::error::MirrorError;
use mirrorsync_store::{DocumentPath, Snapshot};
use mirrorsync_value::Patch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Rewrites an outgoing payload before it is sent.
pub type TransformUpdate = Arc<dyn Fn(Patch) -> Patch + Send + Sync>;

/// Observes every inbound change-feed event.
pub type DownloadHook = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Observes every outgoing write, just before it is issued.
pub type UpdateHook = Arc<dyn Fn(&DocumentPath, &Patch) + Send + Sync>;

/// Observes failed writes.
pub type ErrorHook = Arc<dyn Fn(&MirrorError) + Send + Sync>;

/// How remote echoes of local writes are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoGranularity {
    /// Each member document counts its own in-flight writes.
    #[default]
    Document,
    /// A query mirror counts in-flight writes for the whole result set and
    /// skips data overwrites of the next feed batches. Membership changes in
    /// a skipped batch are still applied.
    Batch,
}

/// Options of one mirror.
///
/// Options are fixed when a mirror is created and only change through a
/// registry reset.
#[derive(Clone, Default)]
pub struct MirrorOptions {
    /// Include the document id alongside the data in read projections.
    pub provide_id: bool,
    /// Never write local changes back to the store.
    pub read_only: bool,
    /// Send only the fields that changed instead of the whole document.
    pub ignore_unchanged_fields: bool,
    /// Echo matching for query mirrors.
    pub echo_granularity: EchoGranularity,
    /// Payload rewrite applied before every write.
    pub transform_update: Option<TransformUpdate>,
    /// Inbound event hook.
    pub on_download: Option<DownloadHook>,
    /// Outgoing write hook.
    pub on_update: Option<UpdateHook>,
    /// Failed write hook.
    pub on_error: Option<ErrorHook>,
}

impl MirrorOptions {
    /// Creates the default options: full-document writes, no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes document ids in read projections.
    pub fn with_provide_id(mut self, provide_id: bool) -> Self {
        self.provide_id = provide_id;
        self
    }

    /// Disables write-back.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sends diffs instead of whole documents.
    pub fn with_ignore_unchanged_fields(mut self, ignore: bool) -> Self {
        self.ignore_unchanged_fields = ignore;
        self
    }

    /// Sets the echo matching granularity.
    pub fn with_echo_granularity(mut self, granularity: EchoGranularity) -> Self {
        self.echo_granularity = granularity;
        self
    }

    /// Sets the payload transform.
    pub fn with_transform_update(
        mut self,
        transform: impl Fn(Patch) -> Patch + Send + Sync + 'static,
    ) -> Self {
        self.transform_update = Some(Arc::new(transform));
        self
    }

    /// Sets the inbound event hook.
    pub fn with_on_download(mut self, hook: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.on_download = Some(Arc::new(hook));
        self
    }

    /// Sets the outgoing write hook.
    pub fn with_on_update(
        mut self,
        hook: impl Fn(&DocumentPath, &Patch) + Send + Sync + 'static,
    ) -> Self {
        self.on_update = Some(Arc::new(hook));
        self
    }

    /// Sets the failed write hook.
    pub fn with_on_error(mut self, hook: impl Fn(&MirrorError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for MirrorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorOptions")
            .field("provide_id", &self.provide_id)
            .field("read_only", &self.read_only)
            .field("ignore_unchanged_fields", &self.ignore_unchanged_fields)
            .field("echo_granularity", &self.echo_granularity)
            .field("transform_update", &self.transform_update.is_some())
            .field("on_download", &self.on_download.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Configuration of a [`SyncRegistry`](crate::SyncRegistry).
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Options for mirrors created without explicit options.
    pub default_options: MirrorOptions,
}

impl RegistryConfig {
    /// Creates the default registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options used when a caller passes none.
    pub fn with_default_options(mut self, options: MirrorOptions) -> Self {
        self.default_options = options;
        self
    }
}
