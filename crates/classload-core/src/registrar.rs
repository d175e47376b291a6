//! Registration hook handed to a library while it is being opened

use crate::error::Result;
use crate::factory::{Constructor, Factory, FactoryId};
use crate::interface::OwnerId;
use crate::registry::RegistryState;

/// Name of the symbol a native plugin library exports.
///
/// [`declare_plugin_library!`](crate::declare_plugin_library) generates it.
pub const REGISTER_SYMBOL: &str = "classload_register_plugins";

/// Signature of a library's registration entry point.
pub type RegisterFn = fn(&mut Registrar<'_>);

/// Records the factories a library exports while it is being opened.
///
/// A registrar only exists for the duration of one backend open call, and it
/// carries the library path and the loader driving that open. Every factory it
/// registers is tagged with both.
pub struct Registrar<'a> {
    state: &'a mut RegistryState,
    owner: OwnerId,
    library_path: &'a str,
    registered: Vec<FactoryId>,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(state: &'a mut RegistryState, owner: OwnerId, library_path: &'a str) -> Self {
        Self {
            state,
            owner,
            library_path,
            registered: Vec::new(),
        }
    }

    /// Library currently being opened
    pub fn library_path(&self) -> &str {
        self.library_path
    }

    /// Owner the new factories are granted to
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Number of factories registered so far by this library
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Register `class_name` as constructible behind interface `B`.
    ///
    /// Fails with [`Error::DuplicateClass`](crate::Error::DuplicateClass) if
    /// another library already registered the same name for `B`; the existing
    /// factory is kept.
    pub fn register<B, F>(&mut self, class_name: &str, build: F) -> Result<()>
    where
        B: ?Sized + 'static,
        F: Fn() -> Box<B> + Send + Sync + 'static,
    {
        let factory = Factory::new(class_name, self.library_path, Constructor::new(build));
        let id = self.state.insert_factory(factory, self.owner)?;
        self.registered.push(id);

        tracing::debug!(
            class = %class_name,
            interface = std::any::type_name::<B>(),
            library = %self.library_path,
            loader = %self.owner,
            "Class registered"
        );

        Ok(())
    }

    /// Drop every factory registered so far.
    ///
    /// A backend must call this before it unmaps a library it failed to
    /// open: the constructors' code lives inside that library.
    pub fn discard_registered(&mut self) {
        for id in self.registered.drain(..) {
            self.state.remove_factory(id);
        }
    }

    /// Undo every registration made through this registrar
    pub(crate) fn rollback(mut self) {
        self.discard_registered();
    }
}

impl std::fmt::Debug for Registrar<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("owner", &self.owner)
            .field("library_path", &self.library_path)
            .field("registered", &self.registered.len())
            .finish()
    }
}

/// Declare the classes a plugin library exports.
///
/// Expands to the `classload_register_plugins` entry point that
/// [`NativeBackend`](crate::backend::NativeBackend) calls right after opening
/// the library. Each class must implement `Default` and the interface trait;
/// it is registered under its literal type name.
///
/// ```rust,ignore
/// use classload_core::declare_plugin_library;
///
/// declare_plugin_library! {
///     Cat => dyn Animal,
///     Dog => dyn Animal,
///     Circle => dyn Shape,
/// }
/// ```
#[macro_export]
macro_rules! declare_plugin_library {
    ($($class:ty => $interface:ty),+ $(,)?) => {
        #[no_mangle]
        pub fn classload_register_plugins(registrar: &mut $crate::Registrar<'_>) {
            $(
                $crate::register_class!(registrar, $class => $interface);
            )+
        }
    };
}

/// Register one `Default`-constructible class with a [`Registrar`].
///
/// Duplicate registrations are reported by the registrar and otherwise ignored.
#[macro_export]
macro_rules! register_class {
    ($registrar:expr, $class:ty => $interface:ty) => {
        let _ = $registrar.register::<$interface, _>(
            stringify!($class),
            || -> ::std::boxed::Box<$interface> {
                ::std::boxed::Box::new(<$class as ::std::default::Default>::default())
            },
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    trait Animal {
        fn speak(&self) -> String;
    }

    #[derive(Default)]
    struct Cat;

    impl Animal for Cat {
        fn speak(&self) -> String {
            "meow".to_string()
        }
    }

    #[test]
    fn test_register_and_rollback() {
        let mut state = RegistryState::default();
        let owner = OwnerId::Loader(1);

        let mut registrar = Registrar::new(&mut state, owner, "libanimals.so");
        register_class!(registrar, Cat => dyn Animal);
        assert_eq!(registrar.registered_count(), 1);
        registrar.rollback();

        assert_eq!(state.factory_count(), 0);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut state = RegistryState::default();

        let mut first = Registrar::new(&mut state, OwnerId::Loader(1), "liba.so");
        first
            .register::<dyn Animal, _>("Cat", || Box::new(Cat))
            .unwrap();

        let mut second = Registrar::new(&mut state, OwnerId::Loader(2), "libb.so");
        let result = second.register::<dyn Animal, _>("Cat", || Box::new(Cat));
        assert!(matches!(result, Err(Error::DuplicateClass { .. })));
        assert_eq!(second.registered_count(), 0);

        assert_eq!(state.factory_count(), 1);
    }

    #[test]
    fn test_discard_registered_then_rollback() {
        let mut state = RegistryState::default();

        let mut registrar = Registrar::new(&mut state, OwnerId::Loader(1), "libanimals.so");
        register_class!(registrar, Cat => dyn Animal);
        registrar.discard_registered();
        assert_eq!(registrar.registered_count(), 0);

        register_class!(registrar, Cat => dyn Animal);
        registrar.rollback();

        assert_eq!(state.factory_count(), 0);
    }
}
