//! Global scope of the process-wide registry
//!
//! Classes linked directly into the host are registered here instead of
//! through a library open. They belong to [`OwnerId::Global`] and are never
//! unloaded.

use crate::error::{Error, Result};
use crate::interface::OwnerId;
use crate::registry::{Lookup, Registry};

/// Register a class compiled into the host under interface `B`
pub fn register_static<B, F>(class_name: &str, build: F) -> Result<()>
where
    B: ?Sized + 'static,
    F: Fn() -> Box<B> + Send + Sync + 'static,
{
    Registry::global().register_static::<B, F>(class_name, build)
}

/// Create a statically registered class.
///
/// Classes from loaded libraries are not visible here; create those through
/// a [`ClassLoader`](crate::ClassLoader).
pub fn create_instance<B: ?Sized + 'static>(class_name: &str) -> Result<Box<B>> {
    match Registry::global().lookup::<B>(class_name, OwnerId::Global) {
        Lookup::Found(constructor) => Ok(constructor.construct()),
        Lookup::NotVisible => Err(Error::create_class(
            class_name,
            std::any::type_name::<B>(),
            "class belongs to a loaded library, not the global scope",
        )),
        Lookup::Missing => Err(Error::create_class(
            class_name,
            std::any::type_name::<B>(),
            "class is not registered",
        )),
    }
}

/// Statically registered classes implementing `B`
pub fn available_classes<B: ?Sized + 'static>() -> Vec<String> {
    Registry::global().classes_visible_to::<B>(OwnerId::Global)
}

/// Whether `class_name` is statically registered for `B`
pub fn is_class_available<B: ?Sized + 'static>(class_name: &str) -> bool {
    available_classes::<B>().iter().any(|c| c == class_name)
}

/// Whether any loader has `path` open in the global registry
pub fn is_library_loaded_by_anybody(path: &str) -> bool {
    Registry::global().is_library_loaded_by_anybody(path)
}

/// Libraries open in the global registry
pub fn open_libraries() -> Vec<String> {
    Registry::global().open_libraries()
}

/// Tear down the global registry, see [`Registry::shutdown`].
///
/// Static classes are dropped as well. Call this once at process exit,
/// after every loader is gone.
pub fn shutdown() -> usize {
    Registry::global().shutdown()
}
