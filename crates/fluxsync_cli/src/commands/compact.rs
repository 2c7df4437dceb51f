//! Compact command implementation.

use super::{open_existing, CliResult};
use std::path::Path;

/// Compaction statistics.
#[derive(Debug, PartialEq, Eq)]
pub struct CompactStats {
    /// Journal records before compaction.
    pub records_before: u64,
    /// Journal records after compaction.
    pub records_after: u64,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    println!("Compacting journal at {path:?}");
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;
    println!("Compaction:");
    println!("  Records before: {}", stats.records_before);
    println!("  Records after:  {}", stats.records_after);
    println!("  Size before:    {} bytes", stats.bytes_before);
    println!("  Size after:     {} bytes", stats.bytes_after);
    if !dry_run {
        println!();
        println!("Compaction complete");
    }
    Ok(())
}

/// Rewrites the journal to one record per live facet and attribute. A dry
/// run estimates the result from the live counts.
pub fn compact(path: &Path, dry_run: bool) -> CliResult<CompactStats> {
    let db = open_existing(path)?;
    let before = db.stats()?;

    if dry_run {
        let live = (before.facets + before.attributes) as u64;
        return Ok(CompactStats {
            records_before: before.journal_records,
            records_after: live.min(before.journal_records),
            bytes_before: before.journal_bytes,
            bytes_after: before.journal_bytes,
        });
    }

    db.compact()?;
    let after = db.stats()?;
    Ok(CompactStats {
        records_before: before.journal_records,
        records_after: after.journal_records,
        bytes_before: before.journal_bytes,
        bytes_after: after.journal_bytes,
    })
}
