//! Reloading a class after the module behind its location changed.

use logdest_bridge::bridge::PluginHost;
use logdest_bridge::loader::{ClassLoader, ClassRegistrar, StaticSource};
use logdest_bridge::message::{Fields, LogMessage, MessageStore};
use logdest_bridge::options::ConfigStore;
use logdest_bridge::plugin::{Capabilities, Destination, DestinationContext};
use logdest_bridge::runtime::Runtime;
use std::sync::{Arc, Mutex};

static OUTPUT: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Prefixes every message with the module version and keeps a per-instance count.
struct Versioned {
    version: &'static str,
    queued: usize,
}

impl Destination for Versioned {
    fn init(&mut self) -> bool {
        true
    }

    fn deinit(&mut self) {}

    fn queue(&mut self, message: &LogMessage) -> bool {
        self.queued += 1;
        let text = message
            .get_value("MESSAGE")
            .ok()
            .flatten()
            .unwrap_or_default();
        OUTPUT
            .lock()
            .unwrap()
            .push(format!("{}#{}:{text}", self.version, self.queued));
        true
    }

    fn flush(&mut self) -> bool {
        true
    }
}

fn v1(_: DestinationContext) -> Box<dyn Destination> {
    Box::new(Versioned {
        version: "v1",
        queued: 0,
    })
}

fn v2(_: DestinationContext) -> Box<dyn Destination> {
    Box::new(Versioned {
        version: "v2",
        queued: 0,
    })
}

fn module_v1(registrar: &mut dyn ClassRegistrar) {
    registrar.register("Versioned", Capabilities::DESTINATION, v1);
}

fn module_v2(registrar: &mut dyn ClassRegistrar) {
    registrar.register("Versioned", Capabilities::DESTINATION, v2);
}

fn record(text: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("MESSAGE".to_string(), text.to_string());
    fields
}

#[test]
fn test_reload_after_location_changed() {
    let source = StaticSource::new();
    source.install("/plugins", module_v1);
    let config = Arc::new(ConfigStore::new());
    let messages = Arc::new(MessageStore::new());
    let host = PluginHost::new(
        ClassLoader::new(source.clone()).unwrap(),
        config.clone(),
        messages.clone(),
    );
    let handle = config.register(Default::default()).unwrap();

    let mut old = host.create_from(handle, "/plugins", "Versioned").unwrap();
    assert!(old.init());
    assert!(old.queue(messages.insert(record("a")).unwrap()));

    source.install("/plugins", module_v2);
    let mut new = host.create_from(handle, "/plugins", "Versioned").unwrap();
    assert!(new.init());

    assert_eq!(old.class().name(), new.class().name());
    assert_ne!(old.class().id(), new.class().id());

    assert!(new.queue(messages.insert(record("b")).unwrap()));
    assert!(old.queue(messages.insert(record("c")).unwrap()));

    let output = OUTPUT.lock().unwrap().clone();
    assert_eq!(output, vec!["v1#1:a", "v2#1:b", "v1#2:c"]);
}

#[test]
fn test_contexts_keep_the_runtime_alive() {
    let source = StaticSource::new();
    source.install("/plugins", module_v1);
    let runtime = Runtime::acquire().unwrap();
    let loader = ClassLoader::with_runtime(source, runtime.clone());

    let class = loader.load_class("/plugins", "Versioned").unwrap();
    assert_eq!(class.context().locations().len(), 1);
    assert!(Arc::ptr_eq(loader.runtime(), &runtime));
    assert!(Runtime::acquire()
        .map(|again| Arc::ptr_eq(&again, &runtime))
        .unwrap());

    drop(loader);
    drop(runtime);
    // The class still holds its context, which holds the runtime.
    assert!(Runtime::is_running());
    drop(class);
}
