//! Shared-library module source.
//!
//! A plugin library exports two symbols, both generated by
//! [`export_destinations!`](crate::export_destinations):
//!
//! - `logdest_abi_version`: `extern "C" fn() -> u32`, checked against
//!   [`ABI_VERSION`] before anything else is touched;
//! - `logdest_register`: `fn(&mut dyn ClassRegistrar) -> Result<(), String>`,
//!   which registers the library's classes into the loading context.
//!
//! The registration function and the destinations it creates use the Rust ABI,
//! so plugins must be built with the same toolchain and the same versions of
//! this crate and of `log` as the host.
//!
//! A library links its own copy of the standard library, and an unwind started
//! there cannot be caught by the host. Everything the host calls in a library
//! therefore catches its own panics inside the library and returns them as
//! values: registration reports `Err`, classes are registered through
//! [`ClassRegistrar::register_guarded`]. Registration also points the library's
//! `log` facade at the host's logger.
//!
//! Libraries are loaded from a shadow copy placed in the context's scratch
//! directory. The dynamic linker therefore sees a new file for every context,
//! and reloading after the library on disk changed yields a fresh image with
//! fresh statics instead of the one already mapped.
#![allow(unsafe_code)]

use crate::loader::context::{ClassRegistrar, LoadingContext, LocationError};
use crate::loader::source::ModuleSource;
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};

/// Version of the plugin ABI this host speaks.
pub const ABI_VERSION: u32 = 2;

/// Symbol reporting the ABI version a library was built for.
pub const ABI_VERSION_SYMBOL: &[u8] = b"logdest_abi_version";

/// Symbol registering a library's classes.
pub const REGISTER_SYMBOL: &[u8] = b"logdest_register";

type AbiVersionFn = extern "C" fn() -> u32;
type RegisterFn = fn(&mut dyn ClassRegistrar) -> Result<(), String>;

/// Loads plugin classes from shared libraries.
///
/// A location naming a file is loaded as a library. A location naming a
/// directory is scanned (non-recursively) for files with the platform's
/// library extension, loaded in file-name order. A location that does not exist
/// contributes nothing.
#[derive(Debug, Clone)]
pub struct DylibSource {
    shadow_copy: bool,
}

impl Default for DylibSource {
    fn default() -> Self {
        Self { shadow_copy: true }
    }
}

impl DylibSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load libraries in place instead of from a per-context copy.
    ///
    /// The dynamic linker then reuses an already mapped image for a path it has
    /// seen, so reloads will not observe changes on disk.
    pub fn without_shadow_copy() -> Self {
        Self { shadow_copy: false }
    }

    fn is_library(path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
    }

    fn scan_directory(&self, dir: &Path, context: &mut LoadingContext) -> Result<(), LocationError> {
        let io_err = |source| LocationError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut libraries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| Self::is_library(path))
            .collect();
        libraries.sort();

        log::debug!(
            "Found {} libraries in {}",
            libraries.len(),
            dir.display()
        );
        for library in libraries {
            if let Err(e) = self.load_library(&library, dir, context) {
                context.record_failure(e);
            }
        }
        Ok(())
    }

    fn shadow_copy(path: &Path, context: &mut LoadingContext) -> Result<PathBuf, LocationError> {
        let io_err = |source| LocationError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());
        let index = context.library_count();
        let target = context
            .shadow_dir()
            .map_err(io_err)?
            .join(format!("{index}-{file_name}"));

        std::fs::copy(path, &target).map_err(io_err)?;
        log::trace!("Shadow copy {} -> {}", path.display(), target.display());
        Ok(target)
    }

    /// Load one library and register its classes under `location`.
    fn load_library(
        &self,
        path: &Path,
        location: &Path,
        context: &mut LoadingContext,
    ) -> Result<(), LocationError> {
        let image = if self.shadow_copy {
            Self::shadow_copy(path, context)?
        } else {
            path.to_path_buf()
        };
        let lib_err = |source| LocationError::Library {
            path: path.to_path_buf(),
            source,
        };

        // SAFETY: Loading a library runs its initializers. Plugin libraries are
        // trusted code named explicitly by the host's configuration.
        let library = unsafe { Library::new(&image) }.map_err(lib_err)?;

        let found = {
            // SAFETY: The symbol type is fixed by the plugin ABI and generated by
            // `export_destinations!`.
            let version: Symbol<AbiVersionFn> =
                unsafe { library.get(ABI_VERSION_SYMBOL) }.map_err(lib_err)?;
            version()
        };
        if found != ABI_VERSION {
            return Err(LocationError::AbiMismatch {
                path: path.to_path_buf(),
                found,
                expected: ABI_VERSION,
            });
        }

        let register: RegisterFn = {
            // SAFETY: Same as above; the ABI version check passed, so the
            // registration signature matches this host.
            let symbol: Symbol<RegisterFn> =
                unsafe { library.get(REGISTER_SYMBOL) }.map_err(lib_err)?;
            *symbol
        };

        let mut registrar = context.registrar_for(location);
        let outcome = register(&mut registrar);

        // Factories registered before a panic point into this image, so it stays
        // loaded either way.
        context.keep_library(library);
        log::debug!("Loaded plugin library {}", path.display());

        outcome.map_err(|reason| LocationError::Initialization {
            path: path.to_path_buf(),
            reason,
        })
    }
}

impl ModuleSource for DylibSource {
    fn open(&self, location: &Path, context: &mut LoadingContext) -> Result<(), LocationError> {
        context.enter(location);
        if location.is_dir() {
            self.scan_directory(location, context)
        } else if location.is_file() {
            self.load_library(location, location, context)
        } else {
            log::debug!("Location {} does not exist", location.display());
            Ok(())
        }
    }
}

/// Export destination classes from a plugin library.
///
/// ```ignore
/// fn make_stdout(ctx: DestinationContext) -> Box<dyn Destination> {
///     Box::new(StdoutDestination::new(ctx))
/// }
///
/// logdest_bridge::export_destinations! {
///     "StdoutDestination" => make_stdout,
///     "StructuredStdout" => make_structured [Capabilities::STRUCTURED],
/// }
/// ```
///
/// Classes without an explicit capability list are plain destinations.
///
/// Registration and everything the host later calls in the library run under a
/// panic guard compiled into the library, so a panicking plugin is reported to
/// the host instead of aborting it.
#[macro_export]
macro_rules! export_destinations {
    (@caps) => {
        $crate::plugin::Capabilities::DESTINATION
    };
    (@caps $caps:expr) => {
        $crate::plugin::Capabilities::DESTINATION | $caps
    };
    ($($name:literal => $factory:path $([$caps:expr])?),* $(,)?) => {
        #[no_mangle]
        pub extern "C" fn logdest_abi_version() -> u32 {
            $crate::loader::ABI_VERSION
        }

        #[no_mangle]
        pub fn logdest_register(
            registrar: &mut dyn $crate::loader::ClassRegistrar,
        ) -> ::std::result::Result<(), ::std::string::String> {
            $crate::plugin::guard::adopt_logger(&*registrar);
            $crate::plugin::guard::catch(|| {
                $(
                    registrar.register_guarded(
                        $name,
                        $crate::export_destinations!(@caps $($caps)?),
                        |ctx| $crate::plugin::guard::construct(ctx, $factory),
                    );
                )*
            })
        }
    };
}
