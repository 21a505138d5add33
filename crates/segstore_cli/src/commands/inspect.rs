//! Inspect command implementation.

use super::{scan_segments, SegmentEntry};
use segstore_core::ReloadState;
use segstore_storage::format;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Number of table directories with segments.
    pub table_count: usize,
    /// Total bytes of segment files.
    pub total_size: u64,
    /// Segments whose reload was interrupted.
    pub pending_recovery: usize,
    /// Per-segment details.
    pub segments: Vec<SegmentSummary>,
}

/// Details of one segment directory.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Table name with type.
    pub table: String,
    /// Segment name.
    pub segment: String,
    /// On-disk shape.
    pub state: ReloadState,
    /// Row count from the manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_docs: Option<u64>,
    /// Column names from the manifest.
    pub columns: Vec<String>,
    /// Stored checksum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<u32>,
    /// Bytes on disk in the primary directory.
    pub size: u64,
    /// Why the manifest could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    table: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = scan_segments(path, table)?;

    let segments: Vec<SegmentSummary> = entries.iter().map(summarize).collect();
    let mut tables: Vec<&str> = segments.iter().map(|s| s.table.as_str()).collect();
    tables.dedup();

    let result = InspectResult {
        path: path.display().to_string(),
        table_count: tables.len(),
        total_size: segments.iter().map(|s| s.size).sum(),
        pending_recovery: segments.iter().filter(|s| !s.state.is_stable()).count(),
        segments,
    };

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn summarize(entry: &SegmentEntry) -> SegmentSummary {
    let mut summary = SegmentSummary {
        table: entry.table.clone(),
        segment: entry.segment.clone(),
        state: entry.state,
        total_docs: None,
        columns: Vec::new(),
        crc: None,
        size: dir_size(&entry.dir),
        error: None,
    };

    if !entry.dir.is_dir() {
        return summary;
    }

    match format::read_manifest(&entry.dir) {
        Ok(manifest) => {
            summary.total_docs = Some(manifest.total_docs);
            summary.columns = manifest.columns;
            summary.crc = Some(manifest.crc);
        }
        Err(e) => summary.error = Some(e.to_string()),
    }
    summary
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

fn print_text_output(result: &InspectResult) {
    println!("segstore Data Directory Inspection");
    println!("==================================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Tables:           {}", result.table_count);
    println!("Segments:         {}", result.segments.len());
    println!("Total size:       {}", format_size(result.total_size));
    println!("Pending recovery: {}", result.pending_recovery);

    let mut current_table = None;
    for segment in &result.segments {
        if current_table != Some(segment.table.as_str()) {
            println!();
            println!("{}:", segment.table);
            current_table = Some(segment.table.as_str());
        }

        let docs = segment
            .total_docs
            .map_or_else(|| "?".to_string(), |docs| docs.to_string());
        print!(
            "  {} {} docs, {} columns, {}",
            segment.segment,
            docs,
            segment.columns.len(),
            format_size(segment.size)
        );
        if let Some(crc) = segment.crc {
            print!(", crc {crc:08x}");
        }
        if !segment.state.is_stable() {
            print!(" [{}]", segment.state);
        }
        if let Some(error) = &segment.error {
            print!(" (error: {error})");
        }
        println!();
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
