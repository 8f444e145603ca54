//! Replay command implementation.

use crate::script::{Script, ScriptError, ScriptOptions, Step};
use mirrorsync_engine::{Mirror, MirrorError, MirrorOptions, SyncRegistry};
use mirrorsync_store::{Delivery, MemoryStore, MemoryStoreConfig, StoreError};
use mirrorsync_value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a replayed session.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Number of steps run.
    pub steps: usize,
    /// Mirrors still registered at the end, sorted by key.
    pub mirrors: Vec<MirrorReport>,
    /// Store contents at the end.
    pub documents: BTreeMap<String, Value>,
    /// Updates issued to the store, failed ones included.
    pub updates: u64,
    /// Feeds opened over the whole session.
    pub subscriptions_opened: u64,
    /// Feeds still attached at the end.
    pub active_subscriptions: usize,
    /// Events or write outcomes still queued.
    pub pending_deliveries: usize,
    /// Failed writes reported to the mirrors, in order.
    pub write_errors: Vec<String>,
}

/// State of one mirror at the end of a session.
#[derive(Debug, Serialize)]
pub struct MirrorReport {
    /// Subscription key.
    pub key: String,
    /// `document` or `query`.
    pub kind: &'static str,
    /// Lifecycle status.
    pub status: String,
    /// What a reader of the mirror sees.
    pub value: Value,
    /// Writes whose echoes are still expected.
    pub pending_skips: u32,
    /// Last feed or write failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl MirrorReport {
    fn from_mirror(key: String, mirror: &Mirror) -> Self {
        let (kind, pending_skips) = match mirror {
            Mirror::Entity(entity) => ("document", entity.pending_remote_skips()),
            Mirror::Query(query) => {
                let members: u32 = query
                    .member_ids()
                    .iter()
                    .map(|id| query.member_pending_skips(id).unwrap_or(0))
                    .sum();
                ("query", members + query.pending_batch_skips())
            }
        };
        Self {
            key,
            kind,
            status: mirror.status().to_string(),
            value: mirror.read(),
            pending_skips,
            last_error: mirror.last_error().map(|err| err.to_string()),
        }
    }
}

/// Runs the replay command.
pub fn run(path: &Path, manual: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(path)?;
    let delivery = if manual {
        Delivery::Manual
    } else {
        Delivery::Immediate
    };
    let report = replay(&script, delivery)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Replays `script` against a fresh in-memory store.
pub fn replay(script: &Script, delivery: Delivery) -> Result<ReplayReport, ScriptError> {
    let store = Arc::new(MemoryStore::with_config(
        MemoryStoreConfig::new().with_delivery(delivery),
    ));
    for (path, data) in &script.documents {
        store.set(path, data.clone())?;
    }
    // Seeding happens before any feed exists, so nothing is queued yet.
    store.deliver_pending();

    let registry = SyncRegistry::new(store.clone());
    let write_errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for (index, step) in script.steps.iter().enumerate() {
        let number = index + 1;
        debug!(step = number, op = step.name(), "replaying step");

        match step {
            Step::Mirror { target, options } => {
                let reference = target.reference()?;
                registry.get_or_create(&reference, Some(mirror_options(options, &write_errors)));
            }
            Step::Edit { target, id, set } => {
                let reference = target.reference()?;
                let mirror = registry
                    .get(&reference)
                    .ok_or_else(|| ScriptError::UnknownMirror {
                        step: number,
                        target: target.to_string(),
                    })?;
                match (&mirror, id) {
                    (Mirror::Entity(entity), None) => entity.edit(|value| set.apply_to(value)),
                    (Mirror::Query(query), Some(id)) => {
                        query.edit_member(id, |value| set.apply_to(value))?
                    }
                    (Mirror::Entity(_), Some(_)) => {
                        return Err(ScriptError::InvalidStep {
                            step: number,
                            reason: "document mirrors take no member id".to_string(),
                        })
                    }
                    (Mirror::Query(_), None) => {
                        return Err(ScriptError::InvalidStep {
                            step: number,
                            reason: "query edits need a member id".to_string(),
                        })
                    }
                }
            }
            Step::RemoteSet { path, data } => store.set(path, data.clone())?,
            Step::RemotePending { path, data } => store.set_with_pending_writes(path, data.clone())?,
            Step::RemoteMerge { path, patch } => store.merge(path, patch)?,
            Step::RemoteDelete { path } => {
                store.delete(path)?;
            }
            Step::FailNextUpdate { message } => {
                store.fail_next_update(StoreError::Rejected(message.clone()));
            }
            Step::FailFeed { target, message } => {
                let failed = store
                    .fail_subscriptions(&target.reference()?, StoreError::Unavailable(message.clone()));
                debug!(step = number, failed, "failed feeds");
            }
            Step::Deliver => {
                let delivered = store.deliver_pending();
                debug!(step = number, delivered, "delivered queued events");
            }
            Step::Reset { target, options } => {
                let options = options
                    .as_ref()
                    .map(|options| mirror_options(options, &write_errors));
                if !registry.reset(&target.reference()?, options)? {
                    return Err(ScriptError::UnknownMirror {
                        step: number,
                        target: target.to_string(),
                    });
                }
            }
            Step::Dispose { target } => {
                registry.dispose(&target.reference()?);
            }
        }
    }

    let mirrors = registry
        .mirrors()
        .into_iter()
        .map(|(key, mirror)| MirrorReport::from_mirror(key.as_str().to_string(), &mirror))
        .collect();
    let documents = store
        .documents()
        .into_iter()
        .map(|(path, value)| (path.to_string(), value))
        .collect();

    let report = ReplayReport {
        steps: script.steps.len(),
        mirrors,
        documents,
        updates: store.update_count(),
        subscriptions_opened: store.subscription_count(),
        active_subscriptions: store.active_subscriptions(),
        pending_deliveries: store.pending_deliveries(),
        write_errors: write_errors.lock().clone(),
    };
    info!(
        steps = report.steps,
        mirrors = report.mirrors.len(),
        updates = report.updates,
        "replay finished"
    );
    Ok(report)
}

fn mirror_options(options: &ScriptOptions, sink: &Arc<Mutex<Vec<String>>>) -> MirrorOptions {
    let sink = Arc::clone(sink);
    MirrorOptions::new()
        .with_provide_id(options.provide_id)
        .with_read_only(options.read_only)
        .with_ignore_unchanged_fields(options.ignore_unchanged_fields)
        .with_echo_granularity(options.echo_granularity)
        .with_on_error(move |err: &MirrorError| sink.lock().push(err.to_string()))
}

fn print_text_output(report: &ReplayReport) {
    println!("Mirrorsync Replay");
    println!("=================");
    println!();
    println!("Steps run: {}", report.steps);
    println!();
    println!("Mirrors:");
    if report.mirrors.is_empty() {
        println!("  (none)");
    }
    for mirror in &report.mirrors {
        println!(
            "  {} [{} {}] pending skips: {}",
            mirror.key, mirror.kind, mirror.status, mirror.pending_skips
        );
        println!("    value: {}", mirror.value);
        if let Some(err) = &mirror.last_error {
            println!("    error: {err}");
        }
    }
    println!();
    println!("Store:");
    println!("  Documents:            {}", report.documents.len());
    println!("  Updates issued:       {}", report.updates);
    println!("  Feeds opened:         {}", report.subscriptions_opened);
    println!("  Feeds attached:       {}", report.active_subscriptions);
    println!("  Pending deliveries:   {}", report.pending_deliveries);
    if !report.write_errors.is_empty() {
        println!();
        println!("Write errors:");
        for err in &report.write_errors {
            println!("  {err}");
        }
    }
}
