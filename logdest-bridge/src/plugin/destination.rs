/// Destination plugin trait and construction context
use crate::message::LogMessage;
use crate::options::Options;

/// Lifecycle contract every destination plugin implements.
///
/// The bridge calls `init` exactly once, then any number of `queue`/`flush`
/// calls, then `deinit` at most once. Calls are never concurrent for one
/// instance. Returning `false` is a normal negative result; panicking is a fault
/// that the bridge catches and reports.
///
/// # Example
///
/// ```
/// use logdest_bridge::message::LogMessage;
/// use logdest_bridge::plugin::{Destination, DestinationContext};
///
/// struct Counter {
///     ctx: DestinationContext,
///     seen: usize,
/// }
///
/// impl Destination for Counter {
///     fn init(&mut self) -> bool {
///         self.ctx.options().require("name").is_ok()
///     }
///
///     fn deinit(&mut self) {}
///
///     fn queue(&mut self, message: &LogMessage) -> bool {
///         self.seen += 1;
///         message.get_value("MESSAGE").is_ok()
///     }
///
///     fn flush(&mut self) -> bool {
///         true
///     }
/// }
/// ```
pub trait Destination: Send + 'static {
    /// Prepare the destination. Read configuration here; return `false` when a
    /// required option is missing or invalid.
    fn init(&mut self) -> bool;

    /// Release everything acquired since `init`.
    fn deinit(&mut self);

    /// Accept (`true`) or reject (`false`) one message. The view must not be
    /// kept beyond the call.
    fn queue(&mut self, message: &LogMessage) -> bool;

    /// Report whether previously accepted messages were delivered.
    fn flush(&mut self) -> bool;
}

/// What a plugin receives when it is constructed.
#[derive(Debug, Clone)]
pub struct DestinationContext {
    class_name: String,
    options: Options,
}

impl DestinationContext {
    pub fn new(class_name: impl Into<String>, options: Options) -> Self {
        Self {
            class_name: class_name.into(),
            options,
        }
    }

    /// Name the class was resolved under.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Configuration bound to the handle the host created this instance with.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

/// Constructor exported for a class name.
pub type DestinationFactory = fn(DestinationContext) -> Box<dyn Destination>;
