//! Destinations loaded from disk by the shared-library tests of `logdest-bridge`.
//!
//! The crate is built twice, with and without the `second-build` feature, so a
//! test can replace the library file and tell the two images apart.

use logdest_bridge::message::LogMessage;
use logdest_bridge::plugin::{Destination, DestinationContext};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(not(feature = "second-build"))]
pub const BUILD: &str = "first";
#[cfg(feature = "second-build")]
pub const BUILD: &str = "second";

/// Instances created by this image.
static CREATED: AtomicUsize = AtomicUsize::new(0);

/// Accepts messages whose `MESSAGE` names this build, at most `limit` of them
/// between two flushes.
struct Versioned {
    ctx: DestinationContext,
    limit: usize,
    pending: usize,
}

impl Destination for Versioned {
    fn init(&mut self) -> bool {
        match self.ctx.options().parse::<usize>("limit") {
            Ok(limit) => {
                self.limit = limit.unwrap_or(usize::MAX);
                log::info!("Versioned destination from the {BUILD} build initialized");
                true
            }
            Err(e) => {
                log::error!("{e}");
                false
            }
        }
    }

    fn deinit(&mut self) {}

    fn queue(&mut self, message: &LogMessage) -> bool {
        if self.pending >= self.limit {
            return false;
        }
        let ours = message.get_value("MESSAGE").ok().flatten().as_deref() == Some(BUILD);
        if ours {
            self.pending += 1;
        }
        ours
    }

    fn flush(&mut self) -> bool {
        self.pending = 0;
        true
    }
}

/// Initializes only when it is the first instance its image created.
struct FirstOfImage {
    ordinal: usize,
}

impl Destination for FirstOfImage {
    fn init(&mut self) -> bool {
        self.ordinal == 0
    }

    fn deinit(&mut self) {}

    fn queue(&mut self, _message: &LogMessage) -> bool {
        true
    }

    fn flush(&mut self) -> bool {
        true
    }
}

/// Panics in every call that can fail.
struct Panicking;

#[allow(clippy::panic)]
impl Destination for Panicking {
    fn init(&mut self) -> bool {
        panic!("init exploded in the {BUILD} build")
    }

    fn deinit(&mut self) {
        panic!("deinit exploded")
    }

    fn queue(&mut self, _message: &LogMessage) -> bool {
        panic!("queue exploded")
    }

    fn flush(&mut self) -> bool {
        panic!("flush exploded")
    }
}

fn make_versioned(ctx: DestinationContext) -> Box<dyn Destination> {
    CREATED.fetch_add(1, Ordering::SeqCst);
    Box::new(Versioned {
        ctx,
        limit: usize::MAX,
        pending: 0,
    })
}

fn make_first_of_image(_: DestinationContext) -> Box<dyn Destination> {
    Box::new(FirstOfImage {
        ordinal: CREATED.fetch_add(1, Ordering::SeqCst),
    })
}

fn make_panicking(_: DestinationContext) -> Box<dyn Destination> {
    Box::new(Panicking)
}

#[allow(clippy::panic)]
fn make_exploding(ctx: DestinationContext) -> Box<dyn Destination> {
    panic!("constructor of {} exploded", ctx.class_name())
}

logdest_bridge::export_destinations! {
    "Versioned" => make_versioned,
    "FirstOfImage" => make_first_of_image,
    "Panicking" => make_panicking,
    "Exploding" => make_exploding,
}
