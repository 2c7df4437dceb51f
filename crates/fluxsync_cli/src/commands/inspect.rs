//! Inspect command implementation.

use super::{open_existing, CliResult};
use fluxsync_core::{ConnectionId, Database, FacetKind, FacetStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Journal records, including superseded ones.
    pub journal_records: u64,
    /// Live facets over all connections.
    pub facets: usize,
    /// Live attributes over all connections.
    pub attributes: usize,
    /// Per-connection details.
    pub connections: Vec<ConnectionSummary>,
}

/// What one connection owns.
#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    /// Connection id.
    pub id: u64,
    /// Facet count per kind name.
    pub facets: BTreeMap<&'static str, usize>,
    /// Stored attributes, checkpoints included.
    pub attributes: BTreeMap<String, String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, connection: Option<u64>, format: &str) -> CliResult<()> {
    let db = open_existing(path)?;
    let result = collect(&db, path, connection)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Gathers statistics of every connection, or of one.
pub fn collect(db: &Database, path: &Path, connection: Option<u64>) -> CliResult<InspectResult> {
    let stats = db.stats()?;
    let ids: Vec<ConnectionId> = match connection {
        Some(id) => vec![ConnectionId::new(id)],
        None => db.connections(),
    };

    let mut connections = Vec::with_capacity(ids.len());
    for id in ids {
        let mut facets = BTreeMap::new();
        for kind in FacetKind::ALL {
            facets.insert(kind.as_str(), db.count(id, Some(kind))?);
        }
        connections.push(ConnectionSummary {
            id: id.as_u64(),
            facets,
            attributes: db.attributes(id).into_iter().collect(),
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: stats.journal_bytes,
        journal_records: stats.journal_records,
        facets: stats.facets,
        attributes: stats.attributes,
        connections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Fluxsync Data Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:    {}", format_size(result.journal_bytes));
    println!("  Records: {}", result.journal_records);
    println!();
    println!("Live data:");
    println!("  Facets:     {}", result.facets);
    println!("  Attributes: {}", result.attributes);

    for connection in &result.connections {
        println!();
        println!("Connection {}:", connection.id);
        for (kind, count) in &connection.facets {
            println!("  {kind:<10} {count}");
        }
        for (key, value) in &connection.attributes {
            println!("  [{key}] {value}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
