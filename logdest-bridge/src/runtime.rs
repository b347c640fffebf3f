//! Process-wide bridge runtime.
//!
//! Loading contexts need somewhere to put shadow copies of plugin libraries.
//! That scratch space is owned by a single [`Runtime`] shared by every host,
//! loader and context in the process. [`Runtime::acquire`] is idempotent: the
//! first call sets the runtime up, later calls hand out the same instance while
//! any holder is alive. The runtime is torn down when its last holder drops, and
//! since every loaded context holds a reference, that always happens after the
//! last plugin library was unloaded.

use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tempfile::TempDir;

static RUNTIME: Mutex<Weak<Runtime>> = Mutex::new(Weak::new());

pub struct Runtime {
    scratch: TempDir,
}

impl Runtime {
    /// Get the running runtime, starting it if nothing holds it.
    pub fn acquire() -> std::io::Result<Arc<Runtime>> {
        let mut slot = RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(runtime) = slot.upgrade() {
            log::trace!("Reusing bridge runtime at {}", runtime.scratch_dir().display());
            return Ok(runtime);
        }

        let prefix = concat!(env!("CARGO_PKG_NAME"), "-");
        let scratch = tempfile::Builder::new().prefix(prefix).tempdir()?;
        log::debug!("Started bridge runtime at {}", scratch.path().display());

        let runtime = Arc::new(Runtime { scratch });
        *slot = Arc::downgrade(&runtime);
        Ok(runtime)
    }

    /// Whether some holder currently keeps the runtime alive.
    pub fn is_running() -> bool {
        RUNTIME
            .lock()
            .map(|slot| slot.strong_count() > 0)
            .unwrap_or(false)
    }

    /// Directory under which loading contexts place their shadow copies.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::debug!(
            "Shutting down bridge runtime at {}",
            self.scratch.path().display()
        );
    }
}
