/// Signal handling for Unix platforms
#[cfg(unix)]
use crate::worker::StopHandle;

/// Stops workers on SIGINT and SIGTERM.
#[cfg(unix)]
pub struct SignalHandler;

#[cfg(unix)]
impl SignalHandler {
    /// Register handlers that trip `stop` when SIGTERM or SIGINT arrives.
    pub fn register_handlers(stop: &StopHandle) {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::flag;

        // Failure only means signals will not stop the worker; explicit stops
        // still work.
        if let Err(e) = flag::register(SIGINT, stop.flag()) {
            log::warn!("Failed to register SIGINT handler: {e}");
        }
        if let Err(e) = flag::register(SIGTERM, stop.flag()) {
            log::warn!("Failed to register SIGTERM handler: {e}");
        }
    }
}

#[cfg(not(unix))]
pub struct SignalHandler;

#[cfg(not(unix))]
impl SignalHandler {
    /// No-op on non-Unix platforms
    pub fn register_handlers(_stop: &crate::worker::StopHandle) {}
}
