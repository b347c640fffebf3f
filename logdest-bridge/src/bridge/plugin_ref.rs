/// Bridged destination instance
use crate::bridge::host::DeinitPolicy;
use crate::handle::MessageHandle;
use crate::loader::ClassHandle;
use crate::message::{LogMessage, MessageSource};
use crate::plugin::{GuardedDestination, LifecycleCall, LifecycleState, Outcome};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Arguments of a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallArgs {
    #[default]
    None,
    /// The message a `queue` call consumes. The view is disposed after the call.
    Message(MessageHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The plugin panicked during the call.
    Panicked,
    /// The bridge refused the call without reaching the plugin.
    Refused,
}

/// Diagnostic kept for every failed dispatch that was not a plain `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub class: String,
    /// `None` when the host named an operation that does not exist.
    pub call: Option<LifecycleCall>,
    pub kind: FaultKind,
    pub detail: String,
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let call = self
            .call
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string());
        match self.kind {
            FaultKind::Panicked => write!(f, "{}.{call} panicked: {}", self.class, self.detail),
            FaultKind::Refused => write!(f, "{}.{call} refused: {}", self.class, self.detail),
        }
    }
}

/// One destination instance driven by the host.
///
/// Methods take `&mut self`, so calls on one instance are serialized; distinct
/// instances can live on distinct threads. Dropping a `PluginRef` that was
/// initialized and not yet deinitialized issues the pending `deinit`.
pub struct PluginRef {
    // Declared first so the instance drops before the class (and the library
    // image the class may live in).
    instance: Box<dyn GuardedDestination>,
    state: LifecycleState,
    faults: Vec<FaultRecord>,
    messages: Arc<dyn MessageSource>,
    deinit_policy: DeinitPolicy,
    class: ClassHandle,
}

impl PluginRef {
    pub(crate) fn new(
        instance: Box<dyn GuardedDestination>,
        class: ClassHandle,
        messages: Arc<dyn MessageSource>,
        deinit_policy: DeinitPolicy,
    ) -> Self {
        Self {
            instance,
            state: LifecycleState::Unconfigured,
            faults: Vec::new(),
            messages,
            deinit_policy,
            class,
        }
    }

    pub fn class(&self) -> &ClassHandle {
        &self.class
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True once `init` failed: the destination is off for the rest of the run.
    pub fn is_disabled(&self) -> bool {
        self.state == LifecycleState::Disabled
    }

    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<FaultRecord> {
        std::mem::take(&mut self.faults)
    }

    /// Invoke a lifecycle operation and report its outcome.
    ///
    /// Returns `false` when the plugin reported failure, when it panicked, and
    /// when the call was refused for breaking the lifecycle ordering. The last
    /// two also leave a [`FaultRecord`]. A message passed in `args` is disposed
    /// before this returns, whatever the outcome.
    pub fn dispatch(&mut self, call: LifecycleCall, args: CallArgs) -> bool {
        if let Err(e) = self.state.permits(call) {
            self.dispose_args(args);
            self.refuse(Some(call), e.to_string());
            return false;
        }

        match (call, args) {
            (LifecycleCall::Queue, CallArgs::Message(handle)) => self.run_queue(handle),
            (LifecycleCall::Queue, CallArgs::None) => {
                self.refuse(Some(call), "queue requires a message".to_string());
                false
            }
            // Only queue consumes a message; anything else passed along is released.
            (LifecycleCall::Init, args) => {
                self.dispose_args(args);
                self.run_init()
            }
            (LifecycleCall::Flush, args) => {
                self.dispose_args(args);
                self.run_flush()
            }
            (LifecycleCall::Deinit, args) => {
                self.dispose_args(args);
                self.run_deinit()
            }
        }
    }

    /// [`dispatch`](Self::dispatch) with the operation given by name.
    pub fn dispatch_named(&mut self, call: &str, args: CallArgs) -> bool {
        match LifecycleCall::from_str(call) {
            Ok(call) => self.dispatch(call, args),
            Err(_) => {
                self.dispose_args(args);
                self.refuse(None, format!("unknown lifecycle operation {call:?}"));
                false
            }
        }
    }

    pub fn init(&mut self) -> bool {
        self.dispatch(LifecycleCall::Init, CallArgs::None)
    }

    pub fn queue(&mut self, message: MessageHandle) -> bool {
        self.dispatch(LifecycleCall::Queue, CallArgs::Message(message))
    }

    pub fn flush(&mut self) -> bool {
        self.dispatch(LifecycleCall::Flush, CallArgs::None)
    }

    pub fn deinit(&mut self) -> bool {
        self.dispatch(LifecycleCall::Deinit, CallArgs::None)
    }

    fn run_init(&mut self) -> bool {
        let ok = self.invoke(LifecycleCall::Init, |d| d.init()).unwrap_or(false);
        self.state = self.state.after(LifecycleCall::Init, ok);
        if ok {
            log::debug!("Destination {} initialized", self.class.id());
        } else {
            log::warn!(
                "Destination {} failed to initialize and is disabled",
                self.class.id()
            );
        }
        ok
    }

    fn run_queue(&mut self, handle: MessageHandle) -> bool {
        // Disposed when it goes out of scope, including after a panic.
        let message = LogMessage::new(self.messages.clone(), handle);
        let accepted = self
            .invoke(LifecycleCall::Queue, |d| d.queue(&message))
            .unwrap_or(false);
        self.state = self.state.after(LifecycleCall::Queue, accepted);
        if !accepted {
            log::trace!("Destination {} rejected {handle}", self.class.id());
        }
        accepted
    }

    fn run_flush(&mut self) -> bool {
        let ok = self
            .invoke(LifecycleCall::Flush, |d| d.flush())
            .unwrap_or(false);
        self.state = self.state.after(LifecycleCall::Flush, ok);
        ok
    }

    fn run_deinit(&mut self) -> bool {
        let reach_plugin =
            self.state.is_usable() || self.deinit_policy == DeinitPolicy::Always;
        // Terminal before the call, so a panicking deinit is never retried.
        self.state = self.state.after(LifecycleCall::Deinit, true);

        if !reach_plugin {
            log::debug!(
                "Skipping deinit of {} after failed init",
                self.class.id()
            );
            return true;
        }
        let ok = self.invoke(LifecycleCall::Deinit, |d| d.deinit()).is_some();
        log::debug!("Destination {} deinitialized", self.class.id());
        ok
    }

    /// Run a guarded plugin call, recording a fault when it panicked.
    fn invoke<R>(
        &mut self,
        call: LifecycleCall,
        f: impl FnOnce(&mut dyn GuardedDestination) -> Outcome<R>,
    ) -> Option<R> {
        match f(self.instance.as_mut()) {
            Ok(value) => Some(value),
            Err(detail) => {
                log::error!("Destination {} panicked in {call}: {detail}", self.class.id());
                self.faults.push(FaultRecord {
                    class: self.class.name().to_string(),
                    call: Some(call),
                    kind: FaultKind::Panicked,
                    detail,
                });
                None
            }
        }
    }

    fn refuse(&mut self, call: Option<LifecycleCall>, detail: String) {
        log::warn!("Refused call on {}: {detail}", self.class.id());
        self.faults.push(FaultRecord {
            class: self.class.name().to_string(),
            call,
            kind: FaultKind::Refused,
            detail,
        });
    }

    fn dispose_args(&self, args: CallArgs) {
        if let CallArgs::Message(handle) = args {
            if let Err(e) = self.messages.dispose(handle) {
                log::warn!("Failed to dispose {handle}: {e}");
            }
        }
    }
}

impl Drop for PluginRef {
    fn drop(&mut self) {
        if self.state.permits(LifecycleCall::Deinit).is_ok() {
            log::debug!("Destination {} dropped without deinit", self.class.id());
            self.run_deinit();
        }
    }
}

impl fmt::Debug for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRef")
            .field("class", &self.class.id())
            .field("state", &self.state)
            .field("faults", &self.faults.len())
            .finish()
    }
}
