//! Generates the key pool and publishes one message per key.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use sigstream_config::KeysServiceConfig;
use sigstream_core::keygen;
use sigstream_core::publish::{PUBLISH_TIMEOUT, publish_keys};
use sigstream_core::stream::redis::RedisTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigstream_services::bootstrap();
    info!("keys service running");

    let config =
        KeysServiceConfig::from_env().context("loading keys-service configuration")?;

    let transport = RedisTransport::connect(&config.broker_url)
        .await
        .context("connecting to broker")?;

    // Generate the full pool before publishing anything; a partial key
    // set is never acceptable.
    let keys = keygen::generate_keys(config.total_keys)
        .context("generating signing keys")?;

    publish_keys(
        Arc::new(transport),
        keys,
        config.max_concurrency,
        PUBLISH_TIMEOUT,
    )
    .await
    .context("publishing signing keys")?;

    Ok(())
}
