use anyhow::{Context, Result};
use selkie_replica::{restore, Replicator, RestoreOutcome};
use tracing::info;

mod config;
mod db;
mod server;
mod telemetry;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    info!("Selkie server starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    config.log_config();

    // Restore must finish before the database file is opened or touched:
    // serving never starts against unknown database state.
    let store = match &config.replica {
        Some(target) => {
            let store = target.build_store()?;
            match restore(&config.db_path, &store, &target.prefix)
                .await
                .context("failed to restore database from replica")?
            {
                RestoreOutcome::Restored(generation) => {
                    info!(%generation, "Database restored from replica")
                }
                RestoreOutcome::Fresh => info!("No restore needed"),
            }
            Some(store)
        }
        None => {
            info!("Replication disabled, skipping restore");
            None
        }
    };

    let db = db::Database::open(&config.db_path)
        .await
        .context("failed to open database")?;
    db.bootstrap_schema(config.schema_path.as_deref())
        .await
        .context("failed to bootstrap schema")?;

    // Replication shadows the opened database in the background from here
    // until the drain sequence flushes and stops it.
    let replicator = config.replica.as_ref().zip(store).map(|(target, store)| {
        Replicator::start(
            &config.db_path,
            store,
            target.prefix.as_str(),
            target.sync_interval,
        )
    });

    server::run(db, config, replicator).await?;

    info!("Server process finished");
    Ok(())
}
