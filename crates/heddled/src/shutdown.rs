//! Signal-driven shutdown for the agent process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use crate::errors::FatalError;

/// Tracing target for process lifecycle events.
const SHUTDOWN_TARGET: &str = "heddled::shutdown";

/// Installs handlers that flip the shared shutdown flag on termination
/// signals.
///
/// The supervisor, heartbeat, and backoff loops observe the flag within
/// one poll tick, so the agent winds down promptly without interrupting a
/// spool write.
///
/// # Errors
///
/// Returns [`FatalError::Signals`] when the handlers cannot be installed.
pub fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<(), FatalError> {
    let mut signals =
        Signals::new([SIGTERM, SIGINT, SIGQUIT]).map_err(|source| FatalError::Signals { source })?;

    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(
                target: SHUTDOWN_TARGET,
                signal,
                "shutdown signal received"
            );
            shutdown.store(true, Ordering::Release);
        }
    });

    Ok(())
}
