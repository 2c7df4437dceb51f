//! Replay command implementation.

use super::{blob_store, CliError, CliResult};
use fluxsync_core::{
    Connection, ConnectionId, ConnectionRegistry, ConnectionStatus, Database, GuestId,
    ProviderRegistry, SystemClock,
};
use fluxsync_engine::{MockProvider, StaticProviders, SyncConfig, SyncEngine, SyncOutcome};
use fluxsync_protocol::RecordedFeed;
use std::path::Path;
use std::sync::Arc;

/// Runs the replay command.
pub fn run(
    path: &Path,
    feed_path: &Path,
    connection: u64,
    provider: &str,
    force: bool,
) -> CliResult<()> {
    let feed = RecordedFeed::from_json(&std::fs::read(feed_path)?)?;
    let outcome = replay(path, feed, connection, provider, force)?;

    match outcome {
        SyncOutcome::Synced(stats) => {
            println!(
                "Synced connection {connection} ({} sync, {} page(s))",
                if stats.full_sync { "full" } else { "incremental" },
                stats.pages
            );
            println!("  Upserted:      {}", stats.upserted.total());
            println!("  Expunged:      {}", stats.expunged.total());
            println!("  Skipped:       {}", stats.skipped);
            println!("  Blobs written: {}", stats.blobs_written);
            println!(
                "  Checkpoint:    usn {} at {}",
                stats.update_count, stats.sync_time
            );
        }
        SyncOutcome::NoOp => println!("Connection {connection} is up to date"),
        SyncOutcome::RateLimited { until } => {
            println!("Rate limited; resume after {until}");
        }
        SyncOutcome::AuthExpired => println!("Authorization expired"),
        SyncOutcome::Busy => println!("A cycle is already running"),
    }
    Ok(())
}

/// Runs one cycle of `connection` against a recorded feed, writing into the
/// data directory at `path`.
pub fn replay(
    path: &Path,
    feed: RecordedFeed,
    connection: u64,
    provider: &str,
    force: bool,
) -> CliResult<SyncOutcome> {
    let known = ProviderRegistry::default();
    if !known.get(provider).is_some_and(|info| info.enabled) {
        return Err(CliError::UnknownProvider(provider.to_string()));
    }

    let db = Arc::new(Database::open(path)?);
    let id = ConnectionId::new(connection);
    let connections = Arc::new(ConnectionRegistry::new());
    connections.insert(Connection {
        id,
        guest_id: GuestId::new(0),
        provider: provider.to_string(),
        status: ConnectionStatus::Up,
        synching: false,
        resume_not_before: None,
        created_at: 0,
    })?;

    let providers = Arc::new(StaticProviders::new());
    providers.register(id, Arc::new(MockProvider::from_feed(feed)));

    let engine = SyncEngine::new(
        SyncConfig::default().with_blob_root(path.join("blobs")),
        db.clone(),
        Arc::new(blob_store(path, provider)),
        connections,
        providers,
        Arc::new(SystemClock),
    );
    let outcome = engine.sync_connector(id, force)?;
    db.sync()?;
    Ok(outcome)
}
