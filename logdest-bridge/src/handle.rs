//! Host-owned handle tables.
//!
//! The host never hands raw pointers to plugins. Every host object a plugin may
//! refer to (a configuration block, a message) lives in a [`HandleTable`] and is
//! addressed by a [`Handle`]: a slot index plus the generation the slot had when
//! the object was inserted. Removing an object bumps the slot generation, so any
//! handle still floating around on the plugin side becomes stale and every later
//! lookup through it fails instead of reaching a recycled object.

use std::fmt;

/// Opaque token for a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Handle to a configuration block registered in a [`crate::options::ConfigStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigHandle(pub(crate) Handle);

/// Handle to a message view registered in a [`crate::message::MessageStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub(crate) Handle);

impl ConfigHandle {
    pub fn raw(&self) -> Handle {
        self.0
    }
}

impl MessageHandle {
    pub fn raw(&self) -> Handle {
        self.0
    }
}

impl fmt::Display for ConfigHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config{}", self.0)
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The slot exists but was released since the handle was issued.
    #[error("handle {0} is stale")]
    Stale(Handle),
    /// The handle was never issued by this table.
    #[error("handle {0} is unknown")]
    Unknown(Handle),
    /// The view owning the handle was already disposed.
    #[error("message view already disposed")]
    Disposed,
    /// Every addressable slot is taken.
    #[error("handle table is full")]
    Exhausted,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational arena backing host-owned objects.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    limit: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::with_limit(u32::MAX as usize)
    }

    /// A table that never grows past `limit` slots.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limit,
        }
    }

    pub fn insert(&mut self, value: T) -> Result<Handle, HandleError> {
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index as usize) {
                slot.value = Some(value);
                self.live += 1;
                return Ok(Handle {
                    index,
                    generation: slot.generation,
                });
            }
        }

        if self.slots.len() >= self.limit {
            return Err(HandleError::Exhausted);
        }
        let index = u32::try_from(self.slots.len()).map_err(|_| HandleError::Exhausted)?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.live += 1;
        Ok(Handle {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, handle: Handle) -> Result<&T, HandleError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(HandleError::Unknown(handle))?;
        if slot.generation != handle.generation {
            return Err(HandleError::Stale(handle));
        }
        slot.value.as_ref().ok_or(HandleError::Stale(handle))
    }

    pub fn remove(&mut self, handle: Handle) -> Result<T, HandleError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(HandleError::Unknown(handle))?;
        if slot.generation != handle.generation {
            return Err(HandleError::Stale(handle));
        }
        let value = slot.value.take().ok_or(HandleError::Stale(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(value)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
