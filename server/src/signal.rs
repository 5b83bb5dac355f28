//! Signal handling for graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install SIGINT/SIGTERM handlers that invoke `on_shutdown` once.
///
/// A second signal forces an immediate exit for the case where the graceful
/// path is stuck.
pub fn install<F>(on_shutdown: F)
where
    F: Fn() + Send + 'static,
{
    let signalled = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, stopping...");
        on_shutdown();
    })
    .expect("failed to install signal handler");
}
