//! Dynamic library backends
//!
//! A backend opens a library by path, runs its registration entry point
//! against the supplied [`Registrar`], and hands back a handle the registry
//! closes once no factory from the library remains.

mod in_process;
mod native;

pub use in_process::{InProcessBackend, LibraryStats};
pub use native::NativeBackend;

use crate::registrar::{RegisterFn, Registrar};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Backend failure
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No library exists at the path
    #[error("library not found: {0}")]
    NotFound(String),

    /// The library does not export the registration entry point
    #[error("missing registration symbol '{symbol}': {reason}")]
    MissingSymbol {
        /// Symbol name
        symbol: String,
        /// Loader message
        reason: String,
    },

    /// The registration entry point panicked
    #[error("registration hook panicked: {0}")]
    RegistrationPanicked(String),

    /// The platform loader refused to open the library
    #[error("{0}")]
    Open(String),

    /// The platform loader refused to close the library
    #[error("{0}")]
    Close(String),
}

/// Opens native libraries and runs their registration hooks.
pub trait LibraryBackend: Send + Sync + fmt::Debug {
    /// Open `path` and let the library register its classes with `registrar`
    /// before returning.
    fn open(
        &self,
        path: &str,
        registrar: &mut Registrar<'_>,
    ) -> Result<Box<dyn LibraryHandle>, BackendError>;

    /// File suffix of libraries on this platform, including the dot
    fn platform_suffix(&self) -> &'static str {
        std::env::consts::DLL_SUFFIX
    }
}

/// An opened library.
pub trait LibraryHandle: Send + Sync + fmt::Debug {
    /// Whether the library is still mapped
    fn is_open(&self) -> bool;

    /// Close the library
    fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Call a library's registration entry point.
///
/// A panic is reported as [`BackendError::RegistrationPanicked`] once every
/// class registered before it has been discarded, so the caller may unmap
/// the library right away.
pub(crate) fn run_registration(
    register: RegisterFn,
    registrar: &mut Registrar<'_>,
) -> Result<(), BackendError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| register(&mut *registrar)));

    outcome.map_err(|payload| {
        registrar.discard_registered();

        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        BackendError::RegistrationPanicked(message)
    })
}

/// Platform file name for a library called `name`, e.g. `libshapes.so`,
/// `shapes.dll` or `libshapes.dylib`.
pub fn library_filename(name: &str) -> String {
    libloading::library_filename(name)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::OwnerId;
    use crate::registry::RegistryState;

    #[test]
    fn test_library_filename() {
        let file = library_filename("shapes");
        assert!(file.contains("shapes"));
        assert!(file.ends_with(std::env::consts::DLL_SUFFIX));
        assert!(file.starts_with(std::env::consts::DLL_PREFIX));
    }

    #[derive(Default)]
    struct Thermometer;

    trait Sensor {}

    impl Sensor for Thermometer {}

    fn register_then_panic(registrar: &mut Registrar<'_>) {
        crate::register_class!(registrar, Thermometer => dyn Sensor);
        panic!("sensor firmware missing");
    }

    #[test]
    fn test_panicking_hook_discards_its_classes() {
        let mut state = RegistryState::default();
        let mut registrar = Registrar::new(&mut state, OwnerId::Loader(1), "libsensors.so");

        let result = run_registration(register_then_panic, &mut registrar);

        match result {
            Err(BackendError::RegistrationPanicked(message)) => {
                assert_eq!(message, "sensor firmware missing")
            }
            other => panic!("expected a registration panic, got {other:?}"),
        }
        assert_eq!(registrar.registered_count(), 0);
        drop(registrar);
        assert_eq!(state.factory_count(), 0);
    }

    #[test]
    fn test_default_platform_suffix() {
        let backend = InProcessBackend::new();
        assert_eq!(backend.platform_suffix(), std::env::consts::DLL_SUFFIX);
    }
}
