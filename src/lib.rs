pub mod app_state;
pub mod config;
pub mod demo;
pub mod error;
pub mod handlers;
pub mod live;
pub mod model;
pub mod orchestrator;
pub mod server;
pub mod signals;
pub mod store;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once per process. The filter is
/// taken from `RUST_LOG` and defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
