//! Many-to-many relation between owners and factories

use crate::factory::FactoryId;
use crate::interface::OwnerId;
use std::collections::{HashMap, HashSet};

/// Bipartite owner ⇄ factory relation, indexed from both sides.
#[derive(Debug, Default)]
pub(crate) struct Ownership {
    by_factory: HashMap<FactoryId, HashSet<OwnerId>>,
    by_owner: HashMap<OwnerId, HashSet<FactoryId>>,
}

impl Ownership {
    /// Add an edge. Returns false if it already existed.
    pub(crate) fn grant(&mut self, owner: OwnerId, factory: FactoryId) -> bool {
        self.by_owner.entry(owner).or_default().insert(factory);
        self.by_factory.entry(factory).or_default().insert(owner)
    }

    /// Remove an edge. Returns true if the factory is now unowned.
    pub(crate) fn revoke(&mut self, owner: OwnerId, factory: FactoryId) -> bool {
        if let Some(factories) = self.by_owner.get_mut(&owner) {
            factories.remove(&factory);
            if factories.is_empty() {
                self.by_owner.remove(&owner);
            }
        }

        match self.by_factory.get_mut(&factory) {
            Some(owners) => {
                owners.remove(&owner);
                if owners.is_empty() {
                    self.by_factory.remove(&factory);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Drop every edge touching `factory`
    pub(crate) fn forget_factory(&mut self, factory: FactoryId) {
        if let Some(owners) = self.by_factory.remove(&factory) {
            for owner in owners {
                if let Some(factories) = self.by_owner.get_mut(&owner) {
                    factories.remove(&factory);
                    if factories.is_empty() {
                        self.by_owner.remove(&owner);
                    }
                }
            }
        }
    }

    pub(crate) fn is_owned_by(&self, factory: FactoryId, owner: OwnerId) -> bool {
        self.by_factory
            .get(&factory)
            .is_some_and(|owners| owners.contains(&owner))
    }

    pub(crate) fn factories_of(&self, owner: OwnerId) -> impl Iterator<Item = FactoryId> + '_ {
        self.by_owner.get(&owner).into_iter().flatten().copied()
    }

    pub(crate) fn owners_of(&self, factory: FactoryId) -> impl Iterator<Item = OwnerId> + '_ {
        self.by_factory.get(&factory).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke() {
        let mut rel = Ownership::default();
        let a = OwnerId::Loader(1);
        let b = OwnerId::Loader(2);
        let f = FactoryId(7);

        assert!(rel.grant(a, f));
        assert!(!rel.grant(a, f));
        assert!(rel.grant(b, f));
        assert!(rel.is_owned_by(f, a));
        assert_eq!(rel.owners_of(f).count(), 2);

        assert!(!rel.revoke(a, f));
        assert!(!rel.is_owned_by(f, a));
        assert_eq!(rel.owners_of(f).collect::<Vec<_>>(), vec![b]);

        assert!(rel.revoke(b, f));
        assert_eq!(rel.owners_of(f).count(), 0);
        assert_eq!(rel.factories_of(b).count(), 0);
    }

    #[test]
    fn test_forget_factory() {
        let mut rel = Ownership::default();
        let a = OwnerId::Loader(1);
        rel.grant(a, FactoryId(1));
        rel.grant(a, FactoryId(2));
        rel.grant(OwnerId::Global, FactoryId(1));

        rel.forget_factory(FactoryId(1));

        assert_eq!(rel.owners_of(FactoryId(1)).count(), 0);
        assert_eq!(rel.factories_of(a).collect::<Vec<_>>(), vec![FactoryId(2)]);
        assert_eq!(rel.factories_of(OwnerId::Global).count(), 0);
    }
}
