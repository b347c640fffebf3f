/// Lifecycle state machine for destination instances
use strum_macros::{Display, EnumString, VariantNames};

/// Operations of the lifecycle contract.
#[derive(EnumString, VariantNames, Display, Debug, Clone, Copy, Eq, Hash, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleCall {
    Init,
    Queue,
    Flush,
    Deinit,
}

/// Observable state of one destination instance.
#[derive(Display, Debug, Clone, Copy, Default, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleState {
    /// Created, `init` not yet issued.
    #[default]
    Unconfigured,
    /// `init` returned `true`.
    Initialized,
    /// At least one `queue` or `flush` was issued after a successful `init`.
    Active,
    /// `init` returned `false` or faulted. The destination is off for the run.
    Disabled,
    /// `deinit` was issued. Terminal.
    Deinitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{call} is not allowed while the destination is {state}")]
pub struct LifecycleError {
    pub call: LifecycleCall,
    pub state: LifecycleState,
}

impl LifecycleState {
    /// Check whether `call` may be issued in this state.
    pub fn permits(self, call: LifecycleCall) -> Result<(), LifecycleError> {
        use LifecycleCall::*;
        use LifecycleState::*;

        let allowed = matches!(
            (self, call),
            (Unconfigured, Init)
                | (Initialized | Active, Queue | Flush | Deinit)
                | (Disabled, Deinit)
        );
        if allowed {
            Ok(())
        } else {
            Err(LifecycleError { call, state: self })
        }
    }

    /// State reached after `call` was issued and reported `succeeded`.
    pub fn after(self, call: LifecycleCall, succeeded: bool) -> LifecycleState {
        match call {
            LifecycleCall::Init if succeeded => LifecycleState::Initialized,
            LifecycleCall::Init => LifecycleState::Disabled,
            LifecycleCall::Queue | LifecycleCall::Flush => LifecycleState::Active,
            LifecycleCall::Deinit => LifecycleState::Deinitialized,
        }
    }

    /// Whether the instance may still receive messages.
    pub fn is_usable(self) -> bool {
        matches!(self, LifecycleState::Initialized | LifecycleState::Active)
    }
}
