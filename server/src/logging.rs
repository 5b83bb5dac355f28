//! Structured logging initialization.
//!
//! `RUST_LOG` takes precedence; without it the server logs at `info`.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}
