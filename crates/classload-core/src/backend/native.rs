//! Native backend over `libloading`

#![allow(unsafe_code)]

use super::{run_registration, BackendError, LibraryBackend, LibraryHandle};
use crate::registrar::{RegisterFn, Registrar, REGISTER_SYMBOL};
use libloading::Library;
use std::path::Path;

/// Opens shared objects with the platform loader.
///
/// After a successful open the backend resolves the library's
/// `classload_register_plugins` entry point and calls it synchronously.
/// Plugins must be built with the same compiler and the same
/// `classload-core` version as the host: trait objects and type ids cross the
/// boundary unchanged.
#[derive(Debug, Clone)]
pub struct NativeBackend {
    symbol: String,
}

impl NativeBackend {
    /// Backend resolving the default registration symbol
    pub fn new() -> Self {
        Self {
            symbol: REGISTER_SYMBOL.to_string(),
        }
    }

    /// Backend resolving a custom registration symbol
    pub fn with_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryBackend for NativeBackend {
    fn open(
        &self,
        path: &str,
        registrar: &mut Registrar<'_>,
    ) -> Result<Box<dyn LibraryHandle>, BackendError> {
        let has_dir = Path::new(path)
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if has_dir && !Path::new(path).exists() {
            return Err(BackendError::NotFound(path.to_string()));
        }

        // SAFETY: running a library's initialisers is inherently trusted; the
        // caller asked for this library to be loaded.
        let library = unsafe { Library::new(path) }.map_err(|e| BackendError::Open(e.to_string()))?;

        // SAFETY: the entry point is generated by `declare_plugin_library!`
        // with exactly the `RegisterFn` signature. The pointer is only used
        // while `library` is alive.
        let register: RegisterFn = unsafe { library.get::<RegisterFn>(self.symbol.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| BackendError::MissingSymbol {
                symbol: self.symbol.clone(),
                reason: e.to_string(),
            })?;

        // `library` must outlive every factory the hook registered, including
        // the ones discarded after a panic.
        run_registration(register, registrar)?;

        Ok(Box::new(NativeLibrary {
            path: path.to_string(),
            library,
        }))
    }
}

#[derive(Debug)]
struct NativeLibrary {
    path: String,
    library: Library,
}

impl LibraryHandle for NativeLibrary {
    fn is_open(&self) -> bool {
        true
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        let NativeLibrary { path, library } = *self;
        library
            .close()
            .map_err(|e| BackendError::Close(format!("{path}: {e}")))
    }
}
