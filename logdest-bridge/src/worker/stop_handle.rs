/// Worker stop handle for graceful shutdown
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle that asks a destination worker to stop from another thread.
///
/// Clones share the same flag. Once stopped, the worker delivers what it already
/// holds, issues `deinit` and exits.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    shutdown_flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new(shutdown_flag: Arc<AtomicBool>) -> Self {
        Self { shutdown_flag }
    }

    /// Request the worker to stop. Idempotent.
    pub fn stop(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown_flag.load(Ordering::Acquire)
    }

    /// The shared flag, for wiring into signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.shutdown_flag.clone()
    }
}
