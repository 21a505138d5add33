//! Recover command implementation.
//!
//! Runs the same sweep an instance runs on startup. The data directory lock
//! is taken first, so the command refuses to touch a directory a running
//! node is serving.

use super::scan_segments;
use segstore_core::recovery::{recover_data_dir, DataDirRecovery};
use segstore_core::InstanceDataDir;
use segstore_storage::LocalFs;
use std::path::Path;

/// Runs the recover command.
pub fn run(
    path: &Path,
    verify: bool,
    dry_run: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = InstanceDataDir::open(path, false)?;

    if dry_run {
        let pending: Vec<_> = scan_segments(dir.path(), None)?
            .into_iter()
            .filter(|entry| !entry.state.is_stable())
            .collect();

        if pending.is_empty() {
            println!("Nothing to recover");
        } else {
            println!("Would recover {} segment(s):", pending.len());
            for entry in &pending {
                println!("  {}/{} [{}]", entry.table, entry.segment, entry.state);
            }
        }
        return Ok(());
    }

    let sweep = recover_data_dir(&LocalFs::new(), dir.path(), verify)?;
    tracing::info!(
        recovered = sweep.reports.len(),
        failed = sweep.failures.len(),
        verify,
        "recovery sweep finished"
    );

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&sweep)?);
        }
        _ => {
            print_text_output(&sweep);
        }
    }

    if sweep.is_clean() {
        Ok(())
    } else {
        Err(format!("{} segment(s) could not be recovered", sweep.failures.len()).into())
    }
}

fn print_text_output(sweep: &DataDirRecovery) {
    if sweep.reports.is_empty() && sweep.failures.is_empty() {
        println!("Nothing to recover");
        return;
    }

    if !sweep.reports.is_empty() {
        println!("Recovered {} segment(s):", sweep.reports.len());
        for report in &sweep.reports {
            println!("  {} [{}]", report.index_dir.display(), report.state);
            for action in &report.actions {
                println!("    - {:?}", action);
            }
        }
    }

    if !sweep.failures.is_empty() {
        println!("Failed to recover {} segment(s):", sweep.failures.len());
        for failure in &sweep.failures {
            println!("  {}: {}", failure.dir.display(), failure.error);
        }
    }
}
