//! Range command implementation.

use super::{open_existing, CliError, CliResult};
use fluxsync_core::{ConnectionId, Database, Facet, FacetKind, FacetStore, TimeRange};
use std::path::Path;

/// Runs the range command.
pub fn run(
    path: &Path,
    connection: u64,
    kind: &str,
    start: i64,
    end: i64,
    format: &str,
) -> CliResult<()> {
    let db = open_existing(path)?;
    let facets = query(&db, connection, kind, TimeRange::new(start, end))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&facets)?),
        _ => {
            for facet in &facets {
                println!(
                    "{:>15} {:>15}  {}",
                    facet.start.unwrap_or_default(),
                    facet.end.unwrap_or_default(),
                    facet.provider_id
                );
            }
            println!("{} {kind} facet(s)", facets.len());
        }
    }
    Ok(())
}

/// Reads the facets of `kind` overlapping `range`.
pub fn query(db: &Database, connection: u64, kind: &str, range: TimeRange) -> CliResult<Vec<Facet>> {
    let kind = FacetKind::parse(kind).ok_or_else(|| CliError::UnknownKind(kind.to_string()))?;
    Ok(db.find_in_range(ConnectionId::new(connection), kind, range)?)
}
