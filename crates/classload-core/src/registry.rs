//! Process-wide factory and library registry
//!
//! Every mutation and lookup happens under a single mutex, which totally
//! orders registry operations across loaders and threads. Backend open and
//! close calls also run inside that critical section, so a registration hook
//! must never try to load another library: the mutex is not re-entrant and
//! doing so deadlocks.

use crate::backend::{LibraryBackend, LibraryHandle, NativeBackend};
use crate::error::{Error, Result};
use crate::factory::{Constructor, Factory, FactoryId};
use crate::interface::OwnerId;
use crate::ownership::Ownership;
use crate::registrar::Registrar;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pseudo library path for classes registered statically into the host
pub const STATIC_LIBRARY: &str = "<static>";

static GLOBAL_REGISTRY: Lazy<Arc<Registry>> =
    Lazy::new(|| Arc::new(Registry::new(Arc::new(NativeBackend::new()))));

/// A class visible to some owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    /// Interface type name
    pub interface: String,
    /// Literal class name
    pub class_name: String,
    /// Library the class was registered from
    pub library_path: String,
}

/// One opened library
#[derive(Debug)]
struct LibraryRecord {
    handle: Box<dyn LibraryHandle>,
}

/// Outcome of a factory lookup
pub(crate) enum Lookup<T> {
    Found(T),
    /// Registered, but the requesting owner may not use it
    NotVisible,
    Missing,
}

impl<T> Lookup<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(found) => Lookup::Found(f(found)),
            Lookup::NotVisible => Lookup::NotVisible,
            Lookup::Missing => Lookup::Missing,
        }
    }
}

/// Registry tables. Only ever touched with the registry lock held.
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    next_factory: u64,
    // Keyed by `TypeId` alone: the name inside an `InterfaceId` may point
    // into a library that has since been closed.
    classes: HashMap<TypeId, BTreeMap<String, FactoryId>>,
    factories: BTreeMap<FactoryId, Factory>,
    ownership: Ownership,
    libraries: HashMap<String, LibraryRecord>,
    /// Live instances per library path. Entries are removed at zero.
    live: HashMap<String, usize>,
}

impl RegistryState {
    pub(crate) fn insert_factory(&mut self, factory: Factory, owner: OwnerId) -> Result<FactoryId> {
        let by_name = self.classes.entry(factory.interface.type_id()).or_default();

        if let Some(existing) = by_name.get(&factory.class_name) {
            let existing_library = self
                .factories
                .get(existing)
                .map(|f| f.library_path.as_str())
                .unwrap_or("<unknown>");
            warn!(
                class = %factory.class_name,
                interface = factory.interface.name(),
                library = %factory.library_path,
                existing_library = %existing_library,
                "Class already registered, keeping the existing factory"
            );
            return Err(Error::DuplicateClass {
                class: factory.class_name,
                interface: factory.interface.name(),
            });
        }

        let id = FactoryId(self.next_factory);
        self.next_factory += 1;

        by_name.insert(factory.class_name.clone(), id);
        self.factories.insert(id, factory);
        self.ownership.grant(owner, id);

        Ok(id)
    }

    pub(crate) fn remove_factory(&mut self, id: FactoryId) {
        self.ownership.forget_factory(id);

        if let Some(factory) = self.factories.remove(&id) {
            if let Some(by_name) = self.classes.get_mut(&factory.interface.type_id()) {
                by_name.remove(&factory.class_name);
                if by_name.is_empty() {
                    self.classes.remove(&factory.interface.type_id());
                }
            }
            debug!(
                class = %factory.class_name,
                library = %factory.library_path,
                "Factory destroyed"
            );
        }
    }

    pub(crate) fn factory_count(&self) -> usize {
        self.factories.len()
    }

    fn factories_for_library<'a>(&'a self, path: &'a str) -> impl Iterator<Item = FactoryId> + 'a {
        self.factories
            .iter()
            .filter(move |(_, f)| f.library_path == path)
            .map(|(id, _)| *id)
    }

    fn owns_any_of_library(&self, path: &str, owner: OwnerId) -> bool {
        self.ownership
            .factories_of(owner)
            .any(|id| self.factories.get(&id).is_some_and(|f| f.library_path == path))
    }

    fn grant_library(&mut self, path: &str, owner: OwnerId) -> usize {
        let ids: Vec<FactoryId> = self.factories_for_library(path).collect();
        let mut granted = 0;
        for id in ids {
            if self.ownership.grant(owner, id) {
                granted += 1;
            }
        }
        granted
    }

    fn find<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        owner: OwnerId,
    ) -> Lookup<(Arc<Constructor<B>>, &str)> {
        let Some(id) = self
            .classes
            .get(&TypeId::of::<B>())
            .and_then(|by_name| by_name.get(class_name))
        else {
            return Lookup::Missing;
        };

        if !self.ownership.is_owned_by(*id, owner) {
            return Lookup::NotVisible;
        }

        match self.factories.get(id) {
            Some(factory) => match factory.constructor::<B>() {
                Some(ctor) => Lookup::Found((ctor, factory.library_path.as_str())),
                None => Lookup::Missing,
            },
            None => Lookup::Missing,
        }
    }

    /// Close `path` unless instances created from it are still alive
    fn close_library(&mut self, path: &str) -> Result<()> {
        if let Some(live) = self.live.get(path) {
            debug!(library = %path, live, "Library has live instances, keeping it open");
            return Ok(());
        }

        let Some(record) = self.libraries.remove(path) else {
            return Ok(());
        };

        match record.handle.close() {
            Ok(()) => {
                info!(library = %path, "Library closed");
                Ok(())
            }
            Err(e) => {
                error!(library = %path, error = %e, "Library close failed, dropped from tracking");
                Err(Error::library_unload(path, e))
            }
        }
    }

    /// Drop every factory, then close every library without live instances.
    /// Returns the number of libraries left open.
    fn teardown(&mut self) -> usize {
        // Factory code may live inside the libraries, so factories go first.
        self.classes.clear();
        self.factories.clear();
        self.ownership = Ownership::default();

        let paths: Vec<String> = self.libraries.keys().cloned().collect();
        for path in paths {
            // Failures are logged by close_library
            let _ = self.close_library(&path);
        }

        if !self.libraries.is_empty() {
            warn!(
                libraries = self.libraries.len(),
                "Libraries kept open until their live instances are released"
            );
        }
        self.libraries.len()
    }
}

/// Store of factories keyed by interface and class name, plus the set of
/// open libraries.
///
/// [`Registry::global`] is the process-wide instance used by default.
/// Independent instances (typically over an
/// [`InProcessBackend`](crate::backend::InProcessBackend)) share nothing with
/// it.
pub struct Registry {
    backend: Arc<dyn LibraryBackend>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("backend", &self.backend)
            .field("factories", &state.factories.len())
            .field("libraries", &state.libraries.len())
            .finish()
    }
}

impl Registry {
    /// Create a registry driving `backend`
    pub fn new(backend: Arc<dyn LibraryBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The process-wide registry, backed by [`NativeBackend`]
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Backend used to open and close libraries
    pub fn backend(&self) -> &Arc<dyn LibraryBackend> {
        &self.backend
    }

    /// Open `path` on behalf of `owner`.
    ///
    /// If the library is already open, `owner` is granted every existing
    /// factory of it and the backend is not called again.
    pub(crate) fn open(&self, path: &str, owner: OwnerId) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(record) = state.libraries.get(path) {
            debug_assert!(record.handle.is_open(), "tracked library {path} is closed");
            let granted = state.grant_library(path, owner);
            debug!(
                library = %path,
                loader = %owner,
                granted,
                "Library already open, attaching loader"
            );
            return Ok(());
        }

        debug!(library = %path, loader = %owner, "Opening library");

        let mut registrar = Registrar::new(state, owner, path);
        match self.backend.open(path, &mut registrar) {
            Ok(handle) => {
                let registered = registrar.registered_count();
                state.libraries.insert(path.to_string(), LibraryRecord { handle });
                info!(library = %path, loader = %owner, classes = registered, "Library opened");
                Ok(())
            }
            Err(e) => {
                registrar.rollback();
                Err(Error::library_load(path, e))
            }
        }
    }

    /// Release `owner`'s claim on every factory of `path`.
    ///
    /// Factories left without owners are destroyed, and once no factory of
    /// `path` remains the library is closed. This is the only place a library
    /// is ever closed. A failed close still drops the library from tracking.
    pub(crate) fn revoke_ownership_and_maybe_close(&self, path: &str, owner: OwnerId) -> Result<()> {
        let mut state = self.state.lock();

        if !state.libraries.contains_key(path) {
            debug!(library = %path, loader = %owner, "Library not open, nothing to release");
            return Ok(());
        }

        let owned: Vec<FactoryId> = state
            .factories_for_library(path)
            .filter(|id| state.ownership.is_owned_by(*id, owner))
            .collect();

        for id in owned {
            if state.ownership.revoke(owner, id) {
                state.remove_factory(id);
            }
        }

        if state.factories_for_library(path).next().is_some() {
            debug!(
                library = %path,
                loader = %owner,
                "Library still used by other loaders, keeping it open"
            );
            return Ok(());
        }

        debug!(library = %path, loader = %owner, "Last owner released library");
        state.close_library(path)
    }

    pub(crate) fn lookup<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        owner: OwnerId,
    ) -> Lookup<Arc<Constructor<B>>> {
        self.state
            .lock()
            .find::<B>(class_name, owner)
            .map(|(ctor, _)| ctor)
    }

    /// Look up a constructor and count one more live instance of its
    /// library. The count must be returned with
    /// [`release_instance`](Self::release_instance).
    pub(crate) fn checkout<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        owner: OwnerId,
    ) -> Lookup<(Arc<Constructor<B>>, String)> {
        let mut state = self.state.lock();

        let found = state
            .find::<B>(class_name, owner)
            .map(|(ctor, path)| (ctor, path.to_string()));

        if let Lookup::Found((_, path)) = &found {
            *state.live.entry(path.clone()).or_default() += 1;
        }
        found
    }

    /// Return the count taken by [`checkout`](Self::checkout). A library
    /// orphaned by [`shutdown`](Self::shutdown) is closed with its last
    /// instance.
    pub(crate) fn release_instance(&self, path: &str) {
        let mut state = self.state.lock();

        let Some(live) = state.live.get_mut(path) else {
            panic!("live instance count underflow for library {path}");
        };
        *live -= 1;
        if *live > 0 {
            return;
        }
        state.live.remove(path);

        if state.libraries.contains_key(path) && state.factories_for_library(path).next().is_none() {
            if let Err(e) = state.close_library(path) {
                error!(library = %path, error = %e, "Deferred library close failed");
            }
        }
    }

    /// Class names registered for interface `B` that `owner` may use
    pub fn classes_visible_to<B: ?Sized + 'static>(&self, owner: OwnerId) -> Vec<String> {
        let state = self.state.lock();

        state
            .classes
            .get(&TypeId::of::<B>())
            .map(|by_name| {
                by_name
                    .iter()
                    .filter(|(_, id)| state.ownership.is_owned_by(**id, owner))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every class, under any interface, that `owner` may use
    pub fn all_classes_visible_to(&self, owner: OwnerId) -> Vec<ClassInfo> {
        let state = self.state.lock();

        let mut classes: Vec<ClassInfo> = state
            .ownership
            .factories_of(owner)
            .filter_map(|id| state.factories.get(&id))
            .map(|f| ClassInfo {
                interface: f.interface.name().to_string(),
                class_name: f.class_name.clone(),
                library_path: f.library_path.clone(),
            })
            .collect();
        classes.sort_by(|a, b| {
            (&a.library_path, &a.interface, &a.class_name).cmp(&(
                &b.library_path,
                &b.interface,
                &b.class_name,
            ))
        });
        classes
    }

    /// Distinct libraries among the factories `owner` may use
    pub fn libraries_used_by(&self, owner: OwnerId) -> Vec<String> {
        let state = self.state.lock();

        let mut libraries: Vec<String> = Vec::new();
        for id in state.ownership.factories_of(owner) {
            if let Some(factory) = state.factories.get(&id) {
                if !libraries.contains(&factory.library_path) {
                    libraries.push(factory.library_path.clone());
                }
            }
        }
        libraries.sort();
        libraries
    }

    /// Owners holding at least one factory of `path`, sorted
    pub fn owners_of_library(&self, path: &str) -> Vec<OwnerId> {
        let state = self.state.lock();

        let mut owners: Vec<OwnerId> = state
            .factories_for_library(path)
            .flat_map(|id| state.ownership.owners_of(id))
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Whether `path` is open, regardless of who opened it
    pub fn is_library_loaded_by_anybody(&self, path: &str) -> bool {
        self.state.lock().libraries.contains_key(path)
    }

    /// Whether `path` is open and `owner` may use at least one of its factories
    pub fn is_library_loaded(&self, path: &str, owner: OwnerId) -> bool {
        let state = self.state.lock();
        state.libraries.contains_key(path) && state.owns_any_of_library(path, owner)
    }

    /// Paths of every open library, sorted
    pub fn open_libraries(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().libraries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of live factories
    pub fn factory_count(&self) -> usize {
        self.state.lock().factory_count()
    }

    /// Tear the registry down: drop every factory, then close every library.
    ///
    /// Libraries that still back live [`PluginHandle`](crate::PluginHandle)s
    /// stay open until the last of those handles is dropped. Afterwards no
    /// class can be created until libraries are opened again. Calling it
    /// twice is harmless. Returns the number of libraries left open.
    pub fn shutdown(&self) -> usize {
        let remaining = self.state.lock().teardown();
        info!(remaining, "Registry shut down");
        remaining
    }

    /// Register a class linked into the host itself.
    ///
    /// The factory belongs to the global scope ([`OwnerId::Global`]) under
    /// [`STATIC_LIBRARY`] and lives as long as the registry.
    pub fn register_static<B, F>(&self, class_name: &str, build: F) -> Result<()>
    where
        B: ?Sized + 'static,
        F: Fn() -> Box<B> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let factory = Factory::new(class_name, STATIC_LIBRARY, Constructor::new(build));
        state.insert_factory(factory, OwnerId::Global)?;

        debug!(
            class = %class_name,
            interface = std::any::type_name::<B>(),
            "Static class registered"
        );
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Every PluginHandle keeps the registry alive, so nothing is pinned here
        self.state.get_mut().teardown();
    }
}
