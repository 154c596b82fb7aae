pub mod api; // HTTP surface
pub mod config;
pub mod crypto;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod seed; // bulk note ingestion

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// built-in filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
