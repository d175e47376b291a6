//! Class loader bound to one library
//!
//! Each loader keeps two counters under its own lock:
//!
//! - the load reference count, moved by `load_library` / `unload_library`,
//! - the live instance count, moved by creating and dropping [`PluginHandle`]s.
//!
//! The library is only released on behalf of this loader when no instance is
//! alive. Lock order is always loader counters first, then the registry.

use crate::config::UnloadPolicy;
use crate::error::{Error, Result};
use crate::interface::OwnerId;
use crate::registry::{ClassInfo, Lookup, Registry};
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct Counts {
    load_refs: usize,
    live: usize,
    /// The owning `ClassLoader` was dropped while instances were alive
    detached: bool,
}

pub(crate) struct LoaderInner {
    owner: OwnerId,
    library_path: String,
    on_demand: bool,
    unload_policy: UnloadPolicy,
    registry: Arc<Registry>,
    counts: Mutex<Counts>,
}

impl fmt::Debug for LoaderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderInner")
            .field("owner", &self.owner)
            .field("library_path", &self.library_path)
            .field("on_demand", &self.on_demand)
            .finish()
    }
}

impl LoaderInner {
    fn load_locked(&self, counts: &mut Counts) -> Result<()> {
        self.registry.open(&self.library_path, self.owner)?;
        counts.load_refs += 1;
        debug!(
            library = %self.library_path,
            loader = %self.owner,
            load_refs = counts.load_refs,
            "Library load requested"
        );
        Ok(())
    }

    fn unload_locked(&self, counts: &mut Counts) -> Result<()> {
        if counts.live > 0 {
            warn!(
                library = %self.library_path,
                loader = %self.owner,
                live = counts.live,
                "Refusing to unload library while instances created by this loader are alive"
            );
            return match self.unload_policy {
                UnloadPolicy::Warn => Ok(()),
                UnloadPolicy::Strict => Err(Error::InstancesStillLive {
                    path: self.library_path.clone(),
                    live: counts.live,
                }),
            };
        }

        if counts.load_refs == 0 {
            debug!(
                library = %self.library_path,
                loader = %self.owner,
                "Unload without matching load ignored"
            );
            return Ok(());
        }

        counts.load_refs -= 1;
        if counts.load_refs == 0 {
            self.registry
                .revoke_ownership_and_maybe_close(&self.library_path, self.owner)?;
        }
        Ok(())
    }

    /// Release every library this loader still holds, regardless of the
    /// load reference count.
    fn release_all_locked(&self, counts: &mut Counts) {
        counts.load_refs = 0;

        let mut libraries = self.registry.libraries_used_by(self.owner);
        if !libraries.contains(&self.library_path) {
            libraries.push(self.library_path.clone());
        }

        for path in libraries {
            if let Err(e) = self.registry.revoke_ownership_and_maybe_close(&path, self.owner) {
                error!(library = %path, loader = %self.owner, error = %e, "Failed to unload library");
            }
        }
    }

    fn on_instance_released(&self, library: &str) {
        let mut counts = self.counts.lock();
        assert!(
            counts.live > 0,
            "live instance count underflow for loader {} ({})",
            self.owner,
            self.library_path
        );
        counts.live -= 1;
        self.registry.release_instance(library);

        if counts.live > 0 {
            return;
        }

        if counts.detached {
            debug!(
                library = %self.library_path,
                loader = %self.owner,
                "Last instance of a dropped loader released, unloading"
            );
            self.release_all_locked(&mut counts);
        } else if self.on_demand {
            if let Err(e) = self.unload_locked(&mut counts) {
                error!(
                    library = %self.library_path,
                    loader = %self.owner,
                    error = %e,
                    "On-demand unload failed"
                );
            }
        }
    }
}

/// Scope of visibility into one library.
///
/// A loader may only create classes from libraries it has loaded itself,
/// even when another loader already opened the same file. With on-demand
/// mode the library is opened by the first `create_instance` and closed when
/// the last instance is dropped.
///
/// Dropping a loader unloads its library. If instances are still alive the
/// unload is deferred until the last of them is dropped.
pub struct ClassLoader {
    inner: Arc<LoaderInner>,
}

impl fmt::Debug for ClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.inner.counts.lock();
        f.debug_struct("ClassLoader")
            .field("owner", &self.inner.owner)
            .field("library_path", &self.inner.library_path)
            .field("on_demand", &self.inner.on_demand)
            .field("load_refs", &counts.load_refs)
            .field("live", &counts.live)
            .finish()
    }
}

impl ClassLoader {
    /// Create a loader for `library_path` on the global registry.
    ///
    /// Unless `on_demand` is set the library is loaded immediately.
    pub fn new(library_path: impl Into<String>, on_demand: bool) -> Result<Self> {
        ClassLoaderBuilder::new(library_path).on_demand(on_demand).build()
    }

    /// Start configuring a loader
    pub fn builder(library_path: impl Into<String>) -> ClassLoaderBuilder {
        ClassLoaderBuilder::new(library_path)
    }

    /// Library this loader is bound to
    pub fn library_path(&self) -> &str {
        &self.inner.library_path
    }

    /// Identity used for factory ownership
    pub fn owner_id(&self) -> OwnerId {
        self.inner.owner
    }

    /// Whether the library is loaded lazily and unloaded with its last instance
    pub fn is_on_demand(&self) -> bool {
        self.inner.on_demand
    }

    /// Policy applied when unloading with live instances
    pub fn unload_policy(&self) -> UnloadPolicy {
        self.inner.unload_policy
    }

    /// Registry this loader works against
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Net number of `load_library` calls not yet matched by an unload
    pub fn load_count(&self) -> usize {
        self.inner.counts.lock().load_refs
    }

    /// Instances created by this loader and not yet dropped
    pub fn live_instances(&self) -> usize {
        self.inner.counts.lock().live
    }

    /// Load the library within this loader's scope.
    ///
    /// Calls nest: `n` loads need `n` unloads before the library is released.
    pub fn load_library(&self) -> Result<()> {
        let mut counts = self.inner.counts.lock();
        self.inner.load_locked(&mut counts)
    }

    /// Undo one `load_library`.
    ///
    /// Refused while instances created by this loader are alive: a warning is
    /// logged and, under [`UnloadPolicy::Strict`],
    /// [`Error::InstancesStillLive`] is returned. The library is only closed
    /// once no other loader claims it either.
    pub fn unload_library(&self) -> Result<()> {
        let mut counts = self.inner.counts.lock();
        self.inner.unload_locked(&mut counts)
    }

    /// Whether the library is open and usable by this loader
    pub fn is_library_loaded(&self) -> bool {
        self.inner
            .registry
            .is_library_loaded(&self.inner.library_path, self.inner.owner)
    }

    /// Whether the library is open by any loader at all
    pub fn is_library_loaded_by_any_loader(&self) -> bool {
        self.inner
            .registry
            .is_library_loaded_by_anybody(&self.inner.library_path)
    }

    /// Classes implementing `B` this loader can create
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        self.inner.registry.classes_visible_to::<B>(self.inner.owner)
    }

    /// Whether `class_name` can be created as a `B`
    pub fn is_class_available<B: ?Sized + 'static>(&self, class_name: &str) -> bool {
        self.available_classes::<B>().iter().any(|c| c == class_name)
    }

    /// Every class visible to this loader, under any interface
    pub fn all_classes(&self) -> Vec<ClassInfo> {
        self.inner.registry.all_classes_visible_to(self.inner.owner)
    }

    /// Create an instance of `class_name` behind interface `B`.
    ///
    /// Loads the library first if this loader has not loaded it yet. If the
    /// class turns out to be unavailable, that implicit load is undone.
    pub fn create_instance<B: ?Sized + 'static>(&self, class_name: &str) -> Result<PluginHandle<B>> {
        match self.try_create_instance::<B>(class_name)? {
            Ok(handle) => Ok(handle),
            Err(reason) => Err(Error::create_class(
                class_name,
                std::any::type_name::<B>(),
                reason,
            )),
        }
    }

    /// Like [`create_instance`](Self::create_instance) but a missing class is
    /// reported as the inner `Err` so callers can fall through to other
    /// loaders.
    pub(crate) fn try_create_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<std::result::Result<PluginHandle<B>, &'static str>> {
        let inner = &self.inner;
        let mut counts = inner.counts.lock();

        let loaded_here = if inner.registry.is_library_loaded(&inner.library_path, inner.owner) {
            false
        } else {
            inner.load_locked(&mut counts)?;
            true
        };

        let (constructor, library) = match inner.registry.checkout::<B>(class_name, inner.owner) {
            Lookup::Found(found) => found,
            miss => {
                if loaded_here {
                    inner.unload_locked(&mut counts)?;
                }
                return Ok(Err(match miss {
                    Lookup::NotVisible => "class is registered but not visible to this loader",
                    _ => "class is not registered",
                }));
            }
        };

        let object = constructor.construct();
        counts.live += 1;
        debug!(
            class = %class_name,
            library = %inner.library_path,
            loader = %inner.owner,
            live = counts.live,
            "Instance created"
        );

        Ok(Ok(PluginHandle {
            object,
            release: ReleaseGuard {
                loader: Arc::clone(inner),
                library,
            },
        }))
    }
}

impl Drop for ClassLoader {
    fn drop(&mut self) {
        let mut counts = self.inner.counts.lock();

        if counts.live > 0 {
            warn!(
                library = %self.inner.library_path,
                loader = %self.inner.owner,
                live = counts.live,
                "Class loader dropped with live instances, unload deferred until they are released"
            );
            counts.detached = true;
            return;
        }

        self.inner.release_all_locked(&mut counts);
    }
}

/// Builder for [`ClassLoader`]
#[derive(Debug)]
pub struct ClassLoaderBuilder {
    library_path: String,
    on_demand: bool,
    unload_policy: UnloadPolicy,
    registry: Option<Arc<Registry>>,
}

impl ClassLoaderBuilder {
    /// Create a builder for `library_path`
    pub fn new(library_path: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            on_demand: false,
            unload_policy: UnloadPolicy::default(),
            registry: None,
        }
    }

    /// Load lazily and unload with the last instance
    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    /// Behaviour of `unload_library` while instances are alive
    pub fn unload_policy(mut self, policy: UnloadPolicy) -> Self {
        self.unload_policy = policy;
        self
    }

    /// Use `registry` instead of [`Registry::global`]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the loader, loading the library unless on-demand
    pub fn build(self) -> Result<ClassLoader> {
        let loader = ClassLoader {
            inner: Arc::new(LoaderInner {
                owner: OwnerId::next_loader(),
                library_path: self.library_path,
                on_demand: self.on_demand,
                unload_policy: self.unload_policy,
                registry: self.registry.unwrap_or_else(Registry::global),
                counts: Mutex::new(Counts::default()),
            }),
        };

        if !loader.inner.on_demand {
            loader.load_library()?;
        }

        Ok(loader)
    }
}

/// Runs the loader's release bookkeeping when a [`PluginHandle`] is dropped.
struct ReleaseGuard {
    loader: Arc<LoaderInner>,
    library: String,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.loader.on_instance_released(&self.library);
    }
}

/// An object created by a [`ClassLoader`].
///
/// Dereferences to the interface `B`. Dropping the handle destroys the object
/// and then tells the loader, which may unload the library in on-demand mode.
/// The handle also keeps the loader's state alive, so the library behind the
/// object cannot be closed while the handle exists.
pub struct PluginHandle<B: ?Sized> {
    // Field order matters: the object must be dropped before the guard runs.
    object: Box<B>,
    release: ReleaseGuard,
}

impl<B: ?Sized> PluginHandle<B> {
    /// Library the object's class came from
    pub fn library_path(&self) -> &str {
        &self.release.library
    }
}

impl<B: ?Sized> Deref for PluginHandle<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.object
    }
}

impl<B: ?Sized> DerefMut for PluginHandle<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.object
    }
}

impl<B: ?Sized> AsRef<B> for PluginHandle<B> {
    fn as_ref(&self) -> &B {
        &self.object
    }
}

impl<B: ?Sized> fmt::Debug for PluginHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("interface", &std::any::type_name::<B>())
            .field("library_path", &self.library_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InProcessBackend;
    use crate::registrar::Registrar;

    trait Animal: Send + Sync {
        fn speak(&self) -> String;
    }

    #[derive(Default)]
    struct Cat;

    impl Animal for Cat {
        fn speak(&self) -> String {
            "meow".to_string()
        }
    }

    #[derive(Default)]
    struct Dog;

    impl Animal for Dog {
        fn speak(&self) -> String {
            "woof".to_string()
        }
    }

    fn register_animals(registrar: &mut Registrar<'_>) {
        crate::register_class!(registrar, Cat => dyn Animal);
        crate::register_class!(registrar, Dog => dyn Animal);
    }

    const LIB: &str = "libanimals.so";

    fn setup() -> (InProcessBackend, Arc<Registry>) {
        let backend = InProcessBackend::new().with_library(LIB, register_animals);
        let registry = Arc::new(Registry::new(Arc::new(backend.clone())));
        (backend, registry)
    }

    #[test]
    fn test_eager_loader_loads_on_build() {
        let (_backend, registry) = setup();

        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();

        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 1);
        assert_eq!(loader.available_classes::<dyn Animal>(), vec!["Cat", "Dog"]);
        assert!(loader.is_class_available::<dyn Animal>("Cat"));
    }

    #[test]
    fn test_create_instance() {
        let (_backend, registry) = setup();
        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();

        let cat = loader.create_instance::<dyn Animal>("Cat").unwrap();
        assert_eq!(cat.speak(), "meow");
        assert_eq!(cat.library_path(), LIB);
        assert_eq!(loader.live_instances(), 1);

        drop(cat);
        assert_eq!(loader.live_instances(), 0);
        assert!(loader.is_library_loaded());
    }

    #[test]
    fn test_on_demand_lifecycle() {
        let (backend, registry) = setup();
        let loader = ClassLoader::builder(LIB)
            .on_demand(true)
            .registry(registry)
            .build()
            .unwrap();

        assert!(!loader.is_library_loaded());
        assert!(!backend.is_open(LIB));

        {
            let dog = loader.create_instance::<dyn Animal>("Dog").unwrap();
            assert_eq!(dog.speak(), "woof");
            assert!(loader.is_library_loaded());
        }

        assert!(!loader.is_library_loaded());
        assert!(!backend.is_open(LIB));
        assert_eq!(backend.close_count(LIB), 1);
    }

    #[test]
    fn test_unload_refused_while_instances_live() {
        let (backend, registry) = setup();
        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();

        let cat = loader.create_instance::<dyn Animal>("Cat").unwrap();
        loader.unload_library().unwrap();

        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 1);

        let dog = loader.create_instance::<dyn Animal>("Dog").unwrap();
        assert_eq!(dog.speak(), "woof");

        drop(cat);
        drop(dog);
        loader.unload_library().unwrap();
        assert!(!loader.is_library_loaded());
        assert!(!backend.is_open(LIB));
    }

    #[test]
    fn test_strict_policy_reports_live_instances() {
        let (_backend, registry) = setup();
        let loader = ClassLoader::builder(LIB)
            .unload_policy(UnloadPolicy::Strict)
            .registry(registry)
            .build()
            .unwrap();

        let _cat = loader.create_instance::<dyn Animal>("Cat").unwrap();
        let result = loader.unload_library();

        assert!(matches!(result, Err(Error::InstancesStillLive { live: 1, .. })));
        assert!(loader.is_library_loaded());
    }

    #[test]
    fn test_missing_class_is_create_failure() {
        let (_backend, registry) = setup();
        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();

        let result = loader.create_instance::<dyn Animal>("Bear");

        match result {
            Err(Error::CreateClass { class, .. }) => assert_eq!(class, "Bear"),
            other => panic!("expected create failure, got {other:?}"),
        }
        assert_eq!(loader.live_instances(), 0);
    }

    #[test]
    fn test_failed_lazy_create_undoes_load() {
        let (backend, registry) = setup();
        let loader = ClassLoader::builder(LIB)
            .on_demand(true)
            .registry(registry)
            .build()
            .unwrap();

        assert!(loader.create_instance::<dyn Animal>("Bear").is_err());

        assert_eq!(loader.load_count(), 0);
        assert!(!loader.is_library_loaded_by_any_loader());
        assert_eq!(backend.open_count(LIB), 1);
        assert_eq!(backend.close_count(LIB), 1);
    }

    #[test]
    fn test_drop_with_live_instances_defers_unload() {
        let (backend, registry) = setup();
        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();

        let cat = loader.create_instance::<dyn Animal>("Cat").unwrap();
        drop(loader);

        assert!(backend.is_open(LIB));
        assert_eq!(cat.speak(), "meow");

        drop(cat);
        assert!(!backend.is_open(LIB));
    }

    #[test]
    fn test_drop_unloads_regardless_of_load_count() {
        let (backend, registry) = setup();
        let loader = ClassLoader::builder(LIB).registry(registry).build().unwrap();
        loader.load_library().unwrap();
        loader.load_library().unwrap();
        assert_eq!(loader.load_count(), 3);

        drop(loader);

        assert!(!backend.is_open(LIB));
    }

    #[test]
    fn test_missing_library() {
        let (_backend, registry) = setup();

        let result = ClassLoader::builder("libnothere.so").registry(registry).build();

        assert!(matches!(result, Err(Error::LibraryLoad { .. })));
    }
}
