//! Loading destination classes from real shared libraries.
//!
//! The `sample-destinations` crate is built twice (once with its
//! `second-build` feature) into a private target directory, and the tests load
//! copies of the resulting libraries.

use logdest_bridge::bridge::{BridgeError, FaultKind, PluginHost, PluginRef};
use logdest_bridge::loader::{ClassLoader, DylibSource, PATH_LIST_SEPARATOR};
use logdest_bridge::message::{Fields, LogMessage, MessageStore};
use logdest_bridge::options::{ConfigStore, Options};
use logdest_bridge::plugin::{DestinationContext, LifecycleCall};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, Once, OnceLock};

struct Builds {
    first: PathBuf,
    second: PathBuf,
}

static BUILDS: OnceLock<Builds> = OnceLock::new();

fn library_file_name() -> String {
    format!(
        "{}sample_destinations{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Build the fixture library and keep a copy of the artifact under `label`.
fn build(features: &[&str], label: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../fixtures/sample-destinations/Cargo.toml");
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("sample-destinations");

    let mut cargo = Command::new(env!("CARGO"));
    cargo
        .args(["build", "--quiet", "--offline", "--manifest-path"])
        .arg(&manifest)
        .arg("--target-dir")
        .arg(&target_dir);
    for feature in features {
        cargo.args(["--features", feature]);
    }
    let status = cargo.status().unwrap();
    assert!(status.success(), "building the fixture library failed: {status}");

    let kept = target_dir.join(label);
    std::fs::create_dir_all(&kept).unwrap();
    let artifact = kept.join(library_file_name());
    std::fs::copy(target_dir.join("debug").join(library_file_name()), &artifact).unwrap();
    artifact
}

fn builds() -> &'static Builds {
    BUILDS.get_or_init(|| Builds {
        first: build(&[], "first"),
        second: build(&["second-build"], "second"),
    })
}

static LOG_LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOG_LINES.lock().unwrap().push(record.args().to_string());
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;

fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Debug);
    });
}

struct Host {
    host: PluginHost,
    config: Arc<ConfigStore>,
    messages: Arc<MessageStore>,
}

impl Host {
    fn new(loader: ClassLoader) -> Self {
        let config = Arc::new(ConfigStore::new());
        let messages = Arc::new(MessageStore::new());
        let host = PluginHost::new(loader, config.clone(), messages.clone());
        Self {
            host,
            config,
            messages,
        }
    }

    fn dylib() -> Self {
        Self::new(ClassLoader::dylib().unwrap())
    }

    fn create(&self, path_list: &Path, class_name: &str, options: &[(&str, &str)]) -> PluginRef {
        self.try_create(path_list, class_name, options).unwrap()
    }

    fn try_create(
        &self,
        path_list: &Path,
        class_name: &str,
        options: &[(&str, &str)],
    ) -> Result<PluginRef, BridgeError> {
        let options: BTreeMap<String, String> = options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let handle = self.config.register(options).unwrap();
        self.host
            .create_from(handle, &path_list.to_string_lossy(), class_name)
    }

    fn queue(&self, plugin: &mut PluginRef, text: &str) -> bool {
        let mut fields = Fields::new();
        fields.insert("MESSAGE".to_string(), text.to_string());
        plugin.queue(self.messages.insert(fields).unwrap())
    }
}

/// A fresh directory holding a copy of `library`.
fn plugin_dir(library: &Path) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(library_file_name());
    std::fs::copy(library, &path).unwrap();
    (dir, path)
}

#[test]
fn test_class_loaded_from_library_file() {
    capture_logs();
    let (_dir, library) = plugin_dir(&builds().first);
    let host = Host::dylib();

    let mut plugin = host.create(&library, "Versioned", &[]);
    assert!(plugin.class().context().failures().is_empty());
    assert_eq!(plugin.class().origin(), Some(library.as_path()));

    assert!(plugin.init());
    assert!(host.queue(&mut plugin, "first"));
    assert!(!host.queue(&mut plugin, "second"));
    assert!(plugin.flush());
    assert!(plugin.deinit());
    assert!(plugin.faults().is_empty());
    assert_eq!(host.messages.live(), 0);

    // The library logs through the host's logger.
    assert!(LOG_LINES
        .lock()
        .unwrap()
        .iter()
        .any(|line| line == "Versioned destination from the first build initialized"));
}

#[test]
fn test_directory_scan_finds_class() {
    let (dir, _library) = plugin_dir(&builds().first);
    let host = Host::dylib();
    let path_list = format!(
        "{}{PATH_LIST_SEPARATOR}{}",
        dir.path().join("absent").display(),
        dir.path().display()
    );

    let mut plugin = host.create(Path::new(&path_list), "FirstOfImage", &[]);
    assert_eq!(plugin.class().origin(), Some(dir.path()));
    assert!(plugin.init());
    assert!(plugin.class().context().failures().is_empty());
}

#[test]
fn test_overwritten_library_is_reloaded() {
    let (_dir, library) = plugin_dir(&builds().first);
    let host = Host::dylib();

    let mut old = host.create(&library, "Versioned", &[]);
    assert!(old.init());

    std::fs::copy(&builds().second, &library).unwrap();
    let mut new = host.create(&library, "Versioned", &[]);
    assert!(new.init());

    assert_ne!(old.class().id(), new.class().id());
    assert_eq!(old.class().name(), new.class().name());

    // The old instance keeps running the image it was created from.
    assert!(host.queue(&mut old, "first"));
    assert!(!host.queue(&mut old, "second"));
    assert!(host.queue(&mut new, "second"));
    assert!(!host.queue(&mut new, "first"));

    drop(old);
    assert!(host.queue(&mut new, "second"));
    assert_eq!(host.messages.live(), 0);
}

#[test]
fn test_instances_keep_their_own_state() {
    let (_dir, library) = plugin_dir(&builds().first);
    let host = Host::dylib();

    let class = host
        .host
        .loader()
        .load_class(&library.to_string_lossy(), "Versioned")
        .unwrap();
    let handle = host
        .config
        .register([("limit".to_string(), "1".to_string())].into())
        .unwrap();
    let context = || {
        DestinationContext::new(class.name(), Options::new(host.config.clone(), handle))
    };
    let message = |text: &str| {
        let mut fields = Fields::new();
        fields.insert("MESSAGE".to_string(), text.to_string());
        LogMessage::new(host.messages.clone(), host.messages.insert(fields).unwrap())
    };

    // Two instances of one class share the image but nothing else.
    let mut a = class.instantiate(context()).unwrap();
    let mut b = class.instantiate(context()).unwrap();
    assert_eq!(a.init(), Ok(true));
    assert_eq!(b.init(), Ok(true));

    assert_eq!(a.queue(&message("first")), Ok(true));
    assert_eq!(a.queue(&message("first")), Ok(false));
    assert_eq!(b.queue(&message("first")), Ok(true));

    assert_eq!(a.flush(), Ok(true));
    assert_eq!(a.queue(&message("first")), Ok(true));
    assert_eq!(host.messages.live(), 0);
}

#[test]
fn test_each_resolution_gets_fresh_statics() {
    let (_dir, library) = plugin_dir(&builds().first);
    let host = Host::dylib();

    let mut first = host.create(&library, "FirstOfImage", &[]);
    let mut again = host.create(&library, "FirstOfImage", &[]);
    assert!(first.init());
    assert!(again.init());
    assert_ne!(first.class().id(), again.class().id());

    // Without shadow copies the dynamic linker hands back the image it already
    // mapped for this path, statics included.
    let in_place = Host::new(ClassLoader::new(DylibSource::without_shadow_copy()).unwrap());
    let mut a = in_place.create(&library, "FirstOfImage", &[]);
    let mut b = in_place.create(&library, "FirstOfImage", &[]);
    assert!(a.init());
    assert!(!b.init());
}

#[test]
fn test_panicking_library_does_not_take_down_the_host() {
    let (_dir, library) = plugin_dir(&builds().first);
    let host = Host::dylib();

    let mut plugin = host.create(&library, "Panicking", &[]);
    assert!(!plugin.init());
    assert!(plugin.is_disabled());
    assert!(!host.queue(&mut plugin, "first"));

    let faults = plugin.take_faults();
    let panicked: Vec<_> = faults
        .iter()
        .filter(|f| f.kind == FaultKind::Panicked)
        .collect();
    assert_eq!(panicked.len(), 1);
    assert_eq!(panicked.first().and_then(|f| f.call), Some(LifecycleCall::Init));
    assert_eq!(
        panicked.first().map(|f| f.detail.as_str()),
        Some("init exploded in the first build")
    );
    assert_eq!(host.messages.live(), 0);

    let err = host.try_create(&library, "Exploding", &[]).unwrap_err();
    assert!(matches!(
        &err,
        BridgeError::Fault { class, detail }
            if class == "Exploding" && detail == "constructor of Exploding exploded"
    ));

    // The host is still able to load and drive classes afterwards.
    let mut healthy = host.create(&library, "Versioned", &[]);
    assert!(healthy.init());
    assert!(host.queue(&mut healthy, "first"));
}

#[test]
fn test_deinit_panic_after_always_policy_is_contained() {
    let (_dir, library) = plugin_dir(&builds().first);
    let config = Arc::new(ConfigStore::new());
    let messages = Arc::new(MessageStore::new());
    let host = PluginHost::new(ClassLoader::dylib().unwrap(), config.clone(), messages)
        .with_deinit_policy(logdest_bridge::bridge::DeinitPolicy::Always);

    let handle = config.register(BTreeMap::new()).unwrap();
    let mut plugin = host
        .create_from(handle, &library.to_string_lossy(), "Panicking")
        .unwrap();
    assert!(!plugin.init());
    assert!(!plugin.deinit());
    assert_eq!(
        plugin.faults().last().map(|f| (f.call, f.detail.as_str())),
        Some((Some(LifecycleCall::Deinit), "deinit exploded"))
    );
}
