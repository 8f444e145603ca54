//! Per-document mirror state and the echo-suppression protocol.
//!
//! Two mechanisms keep a mirror from looping:
//!
//! - `suppress_next_local_reaction` is raised right before a remote value
//!   overwrites the local cell, and consumed by the observer notification
//!   that overwrite produces. Remote data is therefore never written back.
//! - `pending_remote_skips` counts writes issued but not yet echoed. Each
//!   inbound event consumes one count instead of overwriting local data, so
//!   edits made while a write is in flight are not clobbered by the echo.
//!
//! Events carrying the pending-writes marker are ignored altogether: they
//! describe local intent the store has not confirmed.

use crate::config::MirrorOptions;
use crate::error::{MirrorError, MirrorResult};
use crate::observe::Observed;
use mirrorsync_store::{DocumentSnapshot, SnapshotMetadata};
use mirrorsync_value::{diff, Patch, Value};
use std::fmt;

/// Lifecycle of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorStatus {
    /// Created, no reference opened yet.
    #[default]
    Uninitialized,
    /// Subscribed, waiting for the first snapshot.
    Subscribed,
    /// Receiving snapshots.
    Active,
    /// The change feed failed. Reopening with another reference recovers.
    Errored,
    /// Closed for good.
    Disposed,
}

impl MirrorStatus {
    /// Returns true while a change feed is attached.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            MirrorStatus::Subscribed | MirrorStatus::Active | MirrorStatus::Errored
        )
    }

    /// Returns true once the mirror was closed.
    pub fn is_disposed(&self) -> bool {
        matches!(self, MirrorStatus::Disposed)
    }
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MirrorStatus::Uninitialized => "uninitialized",
            MirrorStatus::Subscribed => "subscribed",
            MirrorStatus::Active => "active",
            MirrorStatus::Errored => "errored",
            MirrorStatus::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// What to do with an inbound document event.
#[derive(Debug, PartialEq)]
pub(crate) enum RemoteDecision {
    /// The event echoes one of our writes; a skip was consumed.
    SkipEcho,
    /// The event reflects unconfirmed local writes.
    IgnorePending,
    /// Overwrite the local cell with this value.
    Apply(Value),
}

/// What to do with a local change notification.
#[derive(Debug, PartialEq)]
pub(crate) enum LocalDecision {
    /// The notification was caused by a remote overwrite.
    Suppressed,
    /// A genuine local change. Carries the shadow it must be diffed against.
    Changed {
        /// Remote shadow before this change.
        baseline: Value,
    },
}

/// State of one mirrored document.
#[derive(Debug)]
pub(crate) struct MirrorState {
    /// Caller-facing copy.
    pub local: Observed,
    /// Last value known to be remote-consistent; never aliases `local`.
    pub remote_shadow: Value,
    pub suppress_next_local_reaction: bool,
    pub pending_remote_skips: u32,
    pub exists: bool,
    pub document_id: Option<String>,
    pub metadata: SnapshotMetadata,
    pub last_error: Option<MirrorError>,
    pub is_loading: bool,
}

impl MirrorState {
    /// Creates the state of a mirror that has not loaded yet.
    pub fn new(local: Observed) -> Self {
        Self {
            local,
            remote_shadow: Value::Null,
            suppress_next_local_reaction: false,
            pending_remote_skips: 0,
            exists: false,
            document_id: None,
            metadata: SnapshotMetadata::default(),
            last_error: None,
            is_loading: true,
        }
    }

    /// Creates the state of a query member from the snapshot that added it.
    ///
    /// The cell starts out holding the data, so no overwrite (and no
    /// suppression) is involved.
    pub fn seeded(doc: &DocumentSnapshot) -> Self {
        let data = doc.data();
        Self {
            local: Observed::new(data.clone()),
            remote_shadow: data,
            suppress_next_local_reaction: false,
            pending_remote_skips: 0,
            exists: doc.exists(),
            document_id: Some(doc.id().to_string()),
            metadata: doc.metadata,
            last_error: None,
            is_loading: false,
        }
    }

    /// Resets every field except the cell identity.
    ///
    /// The cell value itself is left alone; the caller clears it once no
    /// lock is held.
    pub fn reset(&mut self) {
        let local = self.local.clone();
        *self = Self::new(local);
    }

    /// Handles an inbound document event.
    pub fn on_remote(&mut self, doc: &DocumentSnapshot) -> RemoteDecision {
        if self.pending_remote_skips > 0 {
            self.pending_remote_skips -= 1;
            return RemoteDecision::SkipEcho;
        }
        if doc.metadata.has_pending_writes {
            return RemoteDecision::IgnorePending;
        }

        let data = doc.data();
        self.suppress_next_local_reaction = true;
        self.remote_shadow = data.clone();
        self.exists = doc.exists();
        self.document_id = Some(doc.id().to_string());
        self.metadata = doc.metadata;
        self.last_error = None;
        self.is_loading = false;
        RemoteDecision::Apply(data)
    }

    /// Handles a local change notification carrying the new cell value.
    ///
    /// A genuine change moves the shadow forward to `value`, whether or not a
    /// write follows.
    pub fn on_local(&mut self, value: &Value) -> LocalDecision {
        if self.suppress_next_local_reaction {
            self.suppress_next_local_reaction = false;
            return LocalDecision::Suppressed;
        }
        let baseline = std::mem::replace(&mut self.remote_shadow, value.clone());
        LocalDecision::Changed { baseline }
    }

    /// Records a feed failure: data is cleared and the failure kept.
    ///
    /// Returns true if the caller must clear the cell. The suppression flag
    /// is raised for that overwrite.
    pub fn fail(&mut self, error: MirrorError) -> bool {
        self.last_error = Some(error);
        self.is_loading = false;
        self.exists = false;
        self.remote_shadow = Value::Null;
        let clear = !self.local.with(Value::is_null);
        if clear {
            self.suppress_next_local_reaction = true;
        }
        clear
    }

    /// Gives back the skip of a write that will never be echoed.
    pub fn release_skip(&mut self) {
        self.pending_remote_skips = self.pending_remote_skips.saturating_sub(1);
    }
}

/// Builds the payload of a write from the shadow and the new local value.
///
/// With `ignore_unchanged_fields` only the diff is sent, otherwise every
/// top-level field. The caller's transform runs last.
pub(crate) fn build_payload(
    baseline: &Value,
    value: &Value,
    options: &MirrorOptions,
) -> MirrorResult<Patch> {
    if !value.is_map() {
        return Err(MirrorError::NotADocument { kind: value.kind() });
    }
    let patch = if options.ignore_unchanged_fields {
        diff(baseline, value)
    } else {
        Patch::full(value).map_err(|_| MirrorError::NotADocument { kind: value.kind() })?
    };
    Ok(match &options.transform_update {
        Some(transform) => transform(patch),
        None => patch,
    })
}

/// Projects a document for readers.
pub(crate) fn project(id: Option<&str>, data: Value, provide_id: bool) -> Value {
    if provide_id {
        Value::map([
            ("id", id.map(Value::from).unwrap_or(Value::Null)),
            ("data", data),
        ])
    } else {
        data
    }
}
