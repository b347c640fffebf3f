//! Read-only message views.
//!
//! A [`LogMessage`] is what a destination sees in `queue`: a handle into the
//! host's message store plus the accessor used to read fields through it. The
//! view is valid for exactly one `queue` call. The bridge disposes it right after
//! the call returns (or panics), and any lookup through a disposed handle fails.

use crate::handle::{HandleError, HandleTable, MessageHandle};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Name/value pairs of a host log record.
pub type Fields = BTreeMap<String, String>;

/// Host-side accessors behind a message handle.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSource: Send + Sync {
    fn get_value(&self, handle: MessageHandle, name: &str) -> Result<Option<String>, HandleError>;

    fn dispose(&self, handle: MessageHandle) -> Result<(), HandleError>;
}

/// View over one host log record.
pub struct LogMessage {
    source: Arc<dyn MessageSource>,
    handle: Option<MessageHandle>,
}

impl LogMessage {
    pub fn new(source: Arc<dyn MessageSource>, handle: MessageHandle) -> Self {
        Self {
            source,
            handle: Some(handle),
        }
    }

    /// The handle this view reads through, or `None` once disposed.
    pub fn handle(&self) -> Option<MessageHandle> {
        self.handle
    }

    /// Look up a named field. `Ok(None)` means the record has no such field.
    pub fn get_value(&self, name: &str) -> Result<Option<String>, HandleError> {
        let handle = self.handle.ok_or(HandleError::Disposed)?;
        self.source.get_value(handle, name)
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }

    /// Release the host record. Calling this twice is a no-op.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.source.dispose(handle) {
                log::warn!("Failed to dispose {handle}: {e}");
            }
        }
    }
}

impl Drop for LogMessage {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMessage")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// In-process message store used by hosts that keep records as field maps.
#[derive(Default)]
pub struct MessageStore {
    table: Mutex<HandleTable<Fields>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a record visible to plugins and return its handle.
    ///
    /// Fails with [`HandleError::Exhausted`] once every slot is in use.
    pub fn insert(&self, fields: Fields) -> Result<MessageHandle, HandleError> {
        match self.table.lock() {
            Ok(mut table) => table.insert(fields).map(MessageHandle),
            Err(poisoned) => {
                log::warn!("Message store lock poisoned, inserting anyway");
                poisoned.into_inner().insert(fields).map(MessageHandle)
            }
        }
    }

    /// Number of views that were handed out and not yet disposed.
    pub fn live(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl MessageSource for MessageStore {
    fn get_value(&self, handle: MessageHandle, name: &str) -> Result<Option<String>, HandleError> {
        let table = self.table.lock().map_err(|_| HandleError::Stale(handle.0))?;
        Ok(table.get(handle.0)?.get(name).cloned())
    }

    fn dispose(&self, handle: MessageHandle) -> Result<(), HandleError> {
        let mut table = self.table.lock().map_err(|_| HandleError::Stale(handle.0))?;
        table.remove(handle.0).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("MESSAGE".to_string(), message.to_string());
        fields.insert("HOST".to_string(), "localhost".to_string());
        fields
    }

    #[test]
    fn test_get_value_through_view() {
        let store = Arc::new(MessageStore::new());
        let handle = store.insert(record("hello")).unwrap();
        let msg = LogMessage::new(store.clone(), handle);

        assert_eq!(msg.get_value("MESSAGE"), Ok(Some("hello".to_string())));
        assert_eq!(msg.get_value("PROGRAM"), Ok(None));
    }

    #[test]
    fn test_dispose_invalidates_view_and_handle() {
        let store = Arc::new(MessageStore::new());
        let handle = store.insert(record("hello")).unwrap();
        let mut msg = LogMessage::new(store.clone(), handle);

        msg.dispose();
        assert!(msg.is_disposed());
        assert_eq!(msg.get_value("MESSAGE"), Err(HandleError::Disposed));

        // A copy of the raw handle kept by a misbehaving plugin is stale too.
        assert_eq!(
            store.get_value(handle, "MESSAGE"),
            Err(HandleError::Stale(handle.raw()))
        );
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn test_drop_disposes_once() {
        let mut source = MockMessageSource::new();
        source.expect_dispose().times(1).returning(|_| Ok(()));

        let store = MessageStore::new();
        let handle = store.insert(Fields::new()).unwrap();
        let mut msg = LogMessage::new(Arc::new(source), handle);
        msg.dispose();
        drop(msg);
    }

    #[test]
    fn test_drop_without_explicit_dispose() {
        let store = Arc::new(MessageStore::new());
        {
            let _msg = LogMessage::new(store.clone(), store.insert(record("a")).unwrap());
            assert_eq!(store.live(), 1);
        }
        assert_eq!(store.live(), 0);
    }
}
