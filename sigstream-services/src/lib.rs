//! Shared bootstrap for the sigstream service binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber. Override the default `info`
/// level via `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Bootstrap common to every service: tracing first, then a best-effort
/// `.env` preload so configuration errors surface with logging in place.
pub fn bootstrap() {
    init_tracing();
    if !sigstream_config::preload_dotenv() {
        tracing::info!(".env file not found, skipping preload");
    }
}
