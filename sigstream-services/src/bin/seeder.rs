//! Seeds the records table for a pipeline run.

use anyhow::Context;
use tracing::{debug, info};

use sigstream_config::SeederConfig;
use sigstream_core::db::{PostgresDatabase, RecordsRepository, SignaturesRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigstream_services::bootstrap();
    info!("seeder running");

    let config = SeederConfig::from_env().context("loading seeder configuration")?;
    info!(total_records = config.total_records, "seeding records");

    let db = PostgresDatabase::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    db.ensure_schema().await.context("ensuring schema")?;

    // Leftovers from a previous run are cleared best-effort; a fresh
    // database has nothing to delete.
    if let Err(err) = db.signatures().clear().await {
        debug!(error = %err, "failed clearing signatures table");
    }
    if let Err(err) = db.records().clear().await {
        debug!(error = %err, "failed clearing records table");
    }

    db.records()
        .seed(config.total_records)
        .await
        .context("seeding records")?;

    info!(total_records = config.total_records, "seeding complete");
    Ok(())
}
