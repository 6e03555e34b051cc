//! SIGINT/SIGTERM latch for the foreground daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route SIGINT and SIGTERM to the stop latch.
///
/// Only one handler can exist per process; a second call keeps the first.
pub fn install() {
    let installed = ctrlc::set_handler(|| {
        info!("Stop signal received");
        request_stop();
    });
    if let Err(e) = installed {
        warn!(error = %e, "Could not install signal handler");
    }
}

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

/// Trip the latch from code, e.g. in tests.
pub fn request_stop() {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}
