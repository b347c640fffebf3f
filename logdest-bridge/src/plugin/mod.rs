mod capabilities;
mod destination;
pub mod guard;
mod state;

// Re-exporting all public structures
pub use capabilities::Capabilities;
pub use destination::{Destination, DestinationContext, DestinationFactory};
pub use guard::{GuardedDestination, GuardedFactory, Outcome};
pub use state::{LifecycleCall, LifecycleError, LifecycleState};
