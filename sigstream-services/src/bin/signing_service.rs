//! The signing coordinator process: pairs batches with keys, signs, and
//! persists until every expected batch has been dispatched.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::info;

use sigstream_config::SigningServiceConfig;
use sigstream_core::coordinator::{CoordinatorSettings, SigningCoordinator};
use sigstream_core::db::PostgresDatabase;
use sigstream_core::stream::StreamTransport;
use sigstream_core::stream::redis::RedisTransport;
use sigstream_model::subject;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigstream_services::bootstrap();
    info!("signing service running");
    let started = Instant::now();

    let config = SigningServiceConfig::from_env()
        .context("loading signing-service configuration")?;

    let db = PostgresDatabase::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let transport = RedisTransport::connect(&config.broker_url)
        .await
        .context("connecting to broker")?;

    let records_consumer = transport
        .durable_consumer("signing-records-consumer", subject::RECORDS_FILTER)
        .await
        .context("creating records consumer")?;
    let keys_consumer = transport
        .durable_consumer("signing-keys-consumer", subject::KEYS_FILTER)
        .await
        .context("creating keys consumer")?;

    let coordinator = SigningCoordinator::new(
        records_consumer,
        keys_consumer,
        Arc::new(db.signatures()),
        CoordinatorSettings::new(
            config.expected_batches() as u64,
            config.max_concurrency,
        ),
    );

    let total_signed = coordinator
        .run()
        .await
        .context("running signing coordinator")?;

    info!(
        total_signed,
        elapsed = ?started.elapsed(),
        "signing service completed signing all records"
    );
    Ok(())
}
