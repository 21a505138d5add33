//! Verify command implementation.

use super::scan_segments;
use segstore_storage::format;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of segments whose checksum matched.
    pub valid_segments: usize,
    /// Number of segments that failed verification.
    pub corrupt_segments: usize,
    /// Number of segments with an interrupted reload.
    pub pending_recovery: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_segments == 0 && self.pending_recovery == 0
    }
}

/// Runs the verify command.
pub fn run(path: &Path, table: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying data directory at {:?}", path);
    println!();

    let mut result = VerifyResult::default();

    for entry in scan_segments(path, table)? {
        result.segments_checked += 1;
        let name = format!("{}/{}", entry.table, entry.segment);

        if !entry.state.is_stable() {
            result.pending_recovery += 1;
            result.errors.push(format!(
                "{name}: interrupted reload ({}), run `segstore recover`",
                entry.state
            ));
        }

        if !entry.dir.is_dir() {
            continue;
        }

        match format::verify_segment_dir(&entry.dir) {
            Ok(manifest) => {
                tracing::debug!(segment = %name, crc = manifest.crc, "segment verified");
                result.valid_segments += 1;
            }
            Err(e) => {
                result.corrupt_segments += 1;
                result.errors.push(format!("{name}: {e}"));
            }
        }
    }

    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Data directory verification passed");
        Ok(())
    } else {
        println!("✗ Data directory verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    println!("  Segments checked: {}", result.segments_checked);
    println!("  Valid:            {}", result.valid_segments);
    println!("  Corrupt:          {}", result.corrupt_segments);
    println!("  Pending recovery: {}", result.pending_recovery);

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
