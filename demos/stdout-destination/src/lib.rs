//! Example destinations that write to stdout.
//!
//! Build as a shared library and point a host's class path at it:
//!
//! ```text
//! cargo build -p stdout-destination
//! pipe-runner --class-path target/debug --class-name StdoutDestination --option name=demo
//! ```

use chrono::Local;
use logdest_bridge::message::LogMessage;
use logdest_bridge::loader::ClassRegistrar;
use logdest_bridge::plugin::{Capabilities, Destination, DestinationContext};
use std::io::Write;

/// Prints every message, prefixed with the configured `name`.
pub struct StdoutDestination<W: Write + Send + 'static = std::io::Stdout> {
    ctx: DestinationContext,
    name: String,
    out: W,
}

impl StdoutDestination {
    pub fn new(ctx: DestinationContext) -> Self {
        Self::with_writer(ctx, std::io::stdout())
    }
}

impl<W: Write + Send + 'static> StdoutDestination<W> {
    pub fn with_writer(ctx: DestinationContext, out: W) -> Self {
        Self {
            ctx,
            name: String::new(),
            out,
        }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    fn emit(&mut self, line: &str) -> bool {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(self.out, "[{timestamp}] [{}] {line}", self.name).is_ok()
    }
}

impl<W: Write + Send + 'static> Destination for StdoutDestination<W> {
    fn init(&mut self) -> bool {
        match self.ctx.options().require("name") {
            Ok(name) => {
                self.name = name;
                log::info!("Initializing {} as {}", self.ctx.class_name(), self.name);
                self.emit("Init")
            }
            Err(e) => {
                log::error!("{}: {e}", self.ctx.class_name());
                false
            }
        }
    }

    fn deinit(&mut self) {
        self.emit("Deinit");
        let _ = self.out.flush();
    }

    fn queue(&mut self, message: &LogMessage) -> bool {
        match message.get_value("MESSAGE") {
            Ok(Some(text)) => self.emit(&format!("queue {text}")),
            Ok(None) => self.emit("queue <no MESSAGE>"),
            Err(e) => {
                log::warn!("{}: cannot read message: {e}", self.ctx.class_name());
                false
            }
        }
    }

    fn flush(&mut self) -> bool {
        self.emit("flush") && self.out.flush().is_ok()
    }
}

/// Prints the fields named by the comma-separated `fields` option as `key=value`.
pub struct StructuredStdout {
    inner: StdoutDestination,
    fields: Vec<String>,
}

impl Destination for StructuredStdout {
    fn init(&mut self) -> bool {
        self.fields = self
            .inner
            .ctx
            .options()
            .get_or("fields", "MESSAGE")
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        self.inner.init()
    }

    fn deinit(&mut self) {
        self.inner.deinit();
    }

    fn queue(&mut self, message: &LogMessage) -> bool {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match message.get_value(field) {
                Ok(value) => parts.push(format!("{field}={}", value.unwrap_or_default())),
                Err(_) => return false,
            }
        }
        self.inner.emit(&parts.join(" "))
    }

    fn flush(&mut self) -> bool {
        self.inner.flush()
    }
}

pub fn make_stdout(ctx: DestinationContext) -> Box<dyn Destination> {
    Box::new(StdoutDestination::new(ctx))
}

pub fn make_structured(ctx: DestinationContext) -> Box<dyn Destination> {
    Box::new(StructuredStdout {
        inner: StdoutDestination::new(ctx),
        fields: Vec::new(),
    })
}

/// Registers the demo classes with a host that links this crate in.
pub fn register(registrar: &mut dyn ClassRegistrar) {
    registrar.register("StdoutDestination", Capabilities::DESTINATION, make_stdout);
    registrar.register(
        "StructuredStdout",
        Capabilities::DESTINATION | Capabilities::STRUCTURED,
        make_structured,
    );
}

logdest_bridge::export_destinations! {
    "StdoutDestination" => make_stdout,
    "StructuredStdout" => make_structured [Capabilities::STRUCTURED],
}
