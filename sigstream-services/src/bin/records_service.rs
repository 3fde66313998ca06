//! Partitions pending records into batches and publishes one message per
//! batch.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use sigstream_config::RecordsServiceConfig;
use sigstream_core::db::PostgresDatabase;
use sigstream_core::publish::{PUBLISH_TIMEOUT, publish_batches};
use sigstream_core::stream::redis::RedisTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigstream_services::bootstrap();
    info!("records service running");

    let config = RecordsServiceConfig::from_env()
        .context("loading records-service configuration")?;

    let db = PostgresDatabase::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let transport = RedisTransport::connect(&config.broker_url)
        .await
        .context("connecting to broker")?;

    let total_batches = config.total_batches();
    publish_batches(
        Arc::new(transport),
        Arc::new(db.records()),
        total_batches,
        config.max_concurrency,
        PUBLISH_TIMEOUT,
    )
    .await
    .context("publishing record batches")?;

    info!(batch_size = config.batch_size, "records service complete");
    Ok(())
}
