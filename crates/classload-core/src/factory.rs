//! Factory records kept by the registry

use crate::interface::InterfaceId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Registry-local factory identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct FactoryId(pub(crate) u64);

/// Typed constructor for one concrete class behind interface `B`.
pub(crate) struct Constructor<B: ?Sized> {
    build: Box<dyn Fn() -> Box<B> + Send + Sync>,
}

impl<B: ?Sized + 'static> Constructor<B> {
    pub(crate) fn new<F>(build: F) -> Self
    where
        F: Fn() -> Box<B> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
        }
    }

    pub(crate) fn construct(&self) -> Box<B> {
        (self.build)()
    }
}

/// The ability to construct one concrete class behind one interface.
///
/// The constructor is type-erased so the registry can hold factories for
/// interfaces it never sees at compile time; callers downcast it back with
/// the interface they ask for.
pub(crate) struct Factory {
    pub(crate) class_name: String,
    pub(crate) interface: InterfaceId,
    pub(crate) library_path: String,
    constructor: Arc<dyn Any + Send + Sync>,
}

impl Factory {
    pub(crate) fn new<B: ?Sized + 'static>(
        class_name: impl Into<String>,
        library_path: impl Into<String>,
        constructor: Constructor<B>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            interface: InterfaceId::of::<B>(),
            library_path: library_path.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Recover the typed constructor. `None` if `B` is not this factory's interface.
    pub(crate) fn constructor<B: ?Sized + 'static>(&self) -> Option<Arc<Constructor<B>>> {
        Arc::clone(&self.constructor).downcast::<Constructor<B>>().ok()
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("class_name", &self.class_name)
            .field("interface", &self.interface)
            .field("library_path", &self.library_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape {
        fn sides(&self) -> u32;
    }

    trait Animal {}

    struct Square;

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    #[test]
    fn test_constructor_roundtrip() {
        let factory = Factory::new(
            "Square",
            "libshapes.so",
            Constructor::<dyn Shape>::new(|| Box::new(Square)),
        );

        assert_eq!(factory.interface, InterfaceId::of::<dyn Shape>());
        let ctor = factory.constructor::<dyn Shape>().unwrap();
        assert_eq!(ctor.construct().sides(), 4);
    }

    #[test]
    fn test_constructor_wrong_interface() {
        let factory = Factory::new(
            "Square",
            "libshapes.so",
            Constructor::<dyn Shape>::new(|| Box::new(Square)),
        );

        assert!(factory.constructor::<dyn Animal>().is_none());
    }
}
