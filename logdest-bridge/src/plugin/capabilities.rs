//! Capability flags a class advertises when it is registered.

use bitflags::bitflags;

bitflags! {
    /// Loading contexts index exported classes by name and these flags; the host
    /// can ask for a class that carries a given set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Implements the destination lifecycle (init/queue/flush/deinit).
        const DESTINATION = 1;
        /// Reads individual message fields instead of only `MESSAGE`.
        const STRUCTURED = 1 << 1;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::DESTINATION
    }
}
