//! Session scripts.
//!
//! A script seeds the store with documents and then runs a list of steps:
//!
//! ```json
//! {
//!   "documents": { "users/alice": { "name": "Alice" } },
//!   "steps": [
//!     { "op": "mirror", "target": "users/alice", "options": { "ignore_unchanged_fields": true } },
//!     { "op": "edit", "target": "users/alice", "set": { "name": "Alicia" } },
//!     { "op": "remote_set", "path": "users/alice", "data": { "name": "Al" } }
//!   ]
//! }
//! ```
//!
//! Targets are either a path string (document or collection, by segment
//! count) or a query object.

use mirrorsync_engine::{EchoGranularity, MirrorError};
use mirrorsync_store::{QuerySpec, Reference, StoreError, StoreResult};
use mirrorsync_value::{Patch, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or replaying a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script file could not be read.
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// The script is not valid JSON or has an unknown shape.
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    /// A store call made by a step failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A mirror call made by a step failed.
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// A step names a mirror that was never opened.
    #[error("step {step}: no mirror for {target}")]
    UnknownMirror {
        /// One-based step number.
        step: usize,
        /// The target as written.
        target: String,
    },

    /// A step is well-formed JSON but cannot be applied.
    #[error("step {step}: {reason}")]
    InvalidStep {
        /// One-based step number.
        step: usize,
        /// What is wrong with it.
        reason: String,
    },
}

/// A parsed session script.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Documents written to the store before any step runs.
    #[serde(default)]
    pub documents: BTreeMap<String, Value>,
    /// Steps, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    /// Reads and parses a script file.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses script text.
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// What a step acts on.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// A document or collection path.
    Path(String),
    /// A filtered or ordered query.
    Query(QuerySpec),
}

impl Target {
    /// Resolves the target to a store reference.
    pub fn reference(&self) -> StoreResult<Reference> {
        match self {
            Target::Path(path) => Reference::parse(path),
            Target::Query(spec) => Ok(Reference::Query(spec.clone())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(path) => f.write_str(path),
            Target::Query(spec) => f.write_str(&spec.canonical()),
        }
    }
}

/// Mirror options a script can set.
///
/// Hooks are not scriptable; the replay installs its own error hook.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptOptions {
    /// Include document ids in reads.
    pub provide_id: bool,
    /// Never write back.
    pub read_only: bool,
    /// Send diffs instead of whole documents.
    pub ignore_unchanged_fields: bool,
    /// Echo matching for query mirrors.
    pub echo_granularity: EchoGranularity,
}

/// One scripted action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Opens (or joins) the mirror of a target.
    Mirror {
        /// What to mirror.
        target: Target,
        /// Options used if the mirror is created.
        #[serde(default)]
        options: ScriptOptions,
    },
    /// Writes fields into the local copy of a mirror.
    Edit {
        /// The mirror to edit.
        target: Target,
        /// Member id, for query mirrors.
        #[serde(default)]
        id: Option<String>,
        /// Fields to set, by dotted path.
        set: Patch,
    },
    /// Replaces a document in the store.
    RemoteSet {
        /// Document path.
        path: String,
        /// New contents.
        data: Value,
    },
    /// Replaces a document, flagged as carrying unacknowledged writes.
    RemotePending {
        /// Document path.
        path: String,
        /// New contents.
        data: Value,
    },
    /// Merges fields into a stored document.
    RemoteMerge {
        /// Document path.
        path: String,
        /// Fields to merge.
        patch: Patch,
    },
    /// Deletes a stored document.
    RemoteDelete {
        /// Document path.
        path: String,
    },
    /// Makes the next store update fail.
    FailNextUpdate {
        /// Rejection message.
        #[serde(default)]
        message: String,
    },
    /// Fails the change feeds of a target.
    FailFeed {
        /// Which feeds to fail.
        target: Target,
        /// Failure message.
        #[serde(default)]
        message: String,
    },
    /// Delivers queued events and write outcomes.
    Deliver,
    /// Re-attaches the local observers of a mirror.
    Reset {
        /// The mirror to reset.
        target: Target,
        /// Replacement options.
        #[serde(default)]
        options: Option<ScriptOptions>,
    },
    /// Closes and unregisters a mirror.
    Dispose {
        /// The mirror to dispose.
        target: Target,
    },
}

impl Step {
    /// Returns the step's operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mirror { .. } => "mirror",
            Step::Edit { .. } => "edit",
            Step::RemoteSet { .. } => "remote_set",
            Step::RemotePending { .. } => "remote_pending",
            Step::RemoteMerge { .. } => "remote_merge",
            Step::RemoteDelete { .. } => "remote_delete",
            Step::FailNextUpdate { .. } => "fail_next_update",
            Step::FailFeed { .. } => "fail_feed",
            Step::Deliver => "deliver",
            Step::Reset { .. } => "reset",
            Step::Dispose { .. } => "dispose",
        }
    }

    /// Returns a one-line description of the step.
    pub fn describe(&self) -> String {
        match self {
            Step::Mirror { target, .. } => format!("mirror {target}"),
            Step::Edit {
                target,
                id: Some(id),
                set,
            } => format!("edit {target} member {id} ({} fields)", set.len()),
            Step::Edit { target, set, .. } => format!("edit {target} ({} fields)", set.len()),
            Step::RemoteSet { path, .. } => format!("remote set {path}"),
            Step::RemotePending { path, .. } => format!("remote set {path} (pending writes)"),
            Step::RemoteMerge { path, patch } => {
                format!("remote merge {path} ({} fields)", patch.len())
            }
            Step::RemoteDelete { path } => format!("remote delete {path}"),
            Step::FailNextUpdate { .. } => "fail next update".to_string(),
            Step::FailFeed { target, .. } => format!("fail feeds of {target}"),
            Step::Deliver => "deliver pending events".to_string(),
            Step::Reset {
                target,
                options: Some(_),
            } => format!("reset {target} with new options"),
            Step::Reset { target, .. } => format!("reset {target}"),
            Step::Dispose { target } => format!("dispose {target}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_step_kind() {
        let script = Script::parse(
            r#"{
                "documents": {"users/a": {"name": "A"}},
                "steps": [
                    {"op": "mirror", "target": "users/a"},
                    {"op": "mirror", "target": {"collection": "users", "limit": 2},
                     "options": {"echo_granularity": "batch", "provide_id": true}},
                    {"op": "edit", "target": "users/a", "set": {"profile.age": 3}},
                    {"op": "edit", "target": "users", "id": "a", "set": {"name": "B"}},
                    {"op": "remote_set", "path": "users/a", "data": {"name": "C"}},
                    {"op": "remote_pending", "path": "users/a", "data": {"name": "D"}},
                    {"op": "remote_merge", "path": "users/a", "patch": {"x": 1}},
                    {"op": "remote_delete", "path": "users/a"},
                    {"op": "fail_next_update", "message": "denied"},
                    {"op": "fail_feed", "target": "users"},
                    {"op": "deliver"},
                    {"op": "reset", "target": "users/a", "options": {"read_only": true}},
                    {"op": "dispose", "target": "users/a"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(script.documents.len(), 1);
        let names: Vec<&str> = script.steps.iter().map(Step::name).collect();
        assert_eq!(
            names,
            vec![
                "mirror",
                "mirror",
                "edit",
                "edit",
                "remote_set",
                "remote_pending",
                "remote_merge",
                "remote_delete",
                "fail_next_update",
                "fail_feed",
                "deliver",
                "reset",
                "dispose"
            ]
        );

        match &script.steps[1] {
            Step::Mirror { target, options } => {
                assert!(matches!(target, Target::Query(_)));
                assert_eq!(options.echo_granularity, EchoGranularity::Batch);
                assert!(options.provide_id);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn path_targets_resolve_by_segment_count() {
        let doc = Target::Path("users/a".into()).reference().unwrap();
        let collection = Target::Path("users".into()).reference().unwrap();
        assert!(doc.is_document());
        assert!(!collection.is_document());
        assert!(Target::Path("".into()).reference().is_err());
    }

    #[test]
    fn unknown_ops_are_rejected() {
        let err = Script::parse(r#"{"steps": [{"op": "explode"}]}"#).unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn describe_mentions_the_target() {
        let step = Step::Edit {
            target: Target::Path("users".into()),
            id: Some("a".into()),
            set: Patch::new(),
        };
        assert_eq!(step.describe(), "edit users member a (0 fields)");
    }
}
