//! Panic containment for destination code.
//!
//! An unwind must never leave the image that started it. A plugin library
//! carries its own copy of the standard library, and the host cannot catch a
//! panic raised by another copy: it aborts instead. The functions here are
//! called from code generated by [`export_destinations!`](crate::export_destinations)
//! inside the plugin crate, so they are compiled into the plugin library and
//! their `catch_unwind` runs against the plugin's own runtime. Only plain values
//! ([`Outcome`]) travel back to the host.
//!
//! Classes registered by modules linked into the host go through the same
//! wrapper, built on the host side.

use crate::loader::ClassRegistrar;
use crate::message::LogMessage;
use crate::plugin::{Destination, DestinationContext, DestinationFactory};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Result of guarded plugin code: its return value, or the panic message.
pub type Outcome<T> = Result<T, String>;

/// A destination whose calls report a panic as `Err` instead of unwinding.
pub trait GuardedDestination: Send {
    fn init(&mut self) -> Outcome<bool>;

    fn deinit(&mut self) -> Outcome<()>;

    fn queue(&mut self, message: &LogMessage) -> Outcome<bool>;

    fn flush(&mut self) -> Outcome<bool>;
}

/// Constructor of a class whose construction and calls are already guarded.
pub type GuardedFactory = fn(DestinationContext) -> Outcome<Box<dyn GuardedDestination>>;

/// Run `f`, turning a panic into its message.
pub fn catch<R>(f: impl FnOnce() -> R) -> Outcome<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Run `factory` under a guard and wrap the instance it returns.
pub fn construct(
    ctx: DestinationContext,
    factory: DestinationFactory,
) -> Outcome<Box<dyn GuardedDestination>> {
    let inner = catch(|| factory(ctx))?;
    Ok(Box::new(Guard { inner: Some(inner) }))
}

/// Route this image's `log` records to the logger of the registering host.
///
/// A library has its own copy of the `log` facade, which starts out with no
/// logger. When the facade was already set up (a module linked into the host),
/// this does nothing.
pub fn adopt_logger(registrar: &dyn ClassRegistrar) {
    if log::set_logger(registrar.logger()).is_ok() {
        log::set_max_level(registrar.max_level());
    }
}

struct Guard {
    inner: Option<Box<dyn Destination>>,
}

impl Guard {
    fn call<R>(&mut self, f: impl FnOnce(&mut dyn Destination) -> R) -> Outcome<R> {
        match self.inner.as_mut() {
            Some(inner) => catch(|| f(inner.as_mut())),
            None => Err("destination already released".to_string()),
        }
    }
}

impl GuardedDestination for Guard {
    fn init(&mut self) -> Outcome<bool> {
        self.call(|d| d.init())
    }

    fn deinit(&mut self) -> Outcome<()> {
        self.call(|d| d.deinit())
    }

    fn queue(&mut self, message: &LogMessage) -> Outcome<bool> {
        self.call(|d| d.queue(message))
    }

    fn flush(&mut self) -> Outcome<bool> {
        self.call(|d| d.flush())
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(detail) = catch(move || drop(inner)) {
                log::error!("Destination panicked while being dropped: {detail}");
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
