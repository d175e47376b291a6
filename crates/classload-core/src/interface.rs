//! Identity keys for interface types and factory owners

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an interface type (usually a `dyn Trait`).
///
/// Equality and hashing use only the [`TypeId`]; the type name is kept for
/// diagnostics because `TypeId` has no readable form.
#[derive(Clone, Copy)]
pub struct InterfaceId {
    type_id: TypeId,
    name: &'static str,
}

impl InterfaceId {
    /// Identity of `B`
    pub fn of<B: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<B>(),
            name: std::any::type_name::<B>(),
        }
    }

    /// Readable type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for InterfaceId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for InterfaceId {}

impl Hash for InterfaceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterfaceId").field(&self.name).finish()
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Something that can own factories: a loader, or the global scope used by
/// classes registered outside of any library open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerId {
    /// Classes registered statically into the host
    Global,
    /// A [`ClassLoader`](crate::ClassLoader)
    Loader(u64),
}

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    /// Allocate a fresh loader identity
    pub(crate) fn next_loader() -> Self {
        OwnerId::Loader(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Global => f.write_str("global"),
            OwnerId::Loader(id) => write!(f, "loader-{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape {}
    trait Animal {}

    #[test]
    fn test_interface_identity() {
        assert_eq!(InterfaceId::of::<dyn Shape>(), InterfaceId::of::<dyn Shape>());
        assert_ne!(InterfaceId::of::<dyn Shape>(), InterfaceId::of::<dyn Animal>());
        assert!(InterfaceId::of::<dyn Shape>().name().contains("Shape"));
    }

    #[test]
    fn test_loader_ids_are_unique() {
        let a = OwnerId::next_loader();
        let b = OwnerId::next_loader();
        assert_ne!(a, b);
        assert_ne!(a, OwnerId::Global);
        assert_eq!(OwnerId::Global.to_string(), "global");
    }
}
