//! Check command implementation.

use crate::script::{Script, ScriptError, Step};
use std::path::Path;

/// Runs the check command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(path)?;
    let lines = check(&script)?;

    println!("Script: {}", path.display());
    println!("Seed documents: {}", script.documents.len());
    println!("Steps: {}", script.steps.len());
    for line in lines {
        println!("  {line}");
    }
    println!();
    println!("✓ Script is valid");
    Ok(())
}

/// Resolves every target and path in `script` without running it.
///
/// Returns one numbered description per step.
pub fn check(script: &Script) -> Result<Vec<String>, ScriptError> {
    for path in script.documents.keys() {
        mirrorsync_store::DocumentPath::parse(path)?;
    }

    let mut lines = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let number = index + 1;
        match step {
            Step::Mirror { target, .. }
            | Step::Edit { target, .. }
            | Step::FailFeed { target, .. }
            | Step::Reset { target, .. }
            | Step::Dispose { target } => {
                target.reference()?;
            }
            Step::RemoteSet { path, .. }
            | Step::RemotePending { path, .. }
            | Step::RemoteMerge { path, .. }
            | Step::RemoteDelete { path } => {
                mirrorsync_store::DocumentPath::parse(path)?;
            }
            Step::FailNextUpdate { .. } | Step::Deliver => {}
        }
        lines.push(format!("{number:>3}. {}", step.describe()));
    }
    Ok(lines)
}
