//! Several libraries behind one flat class namespace

use crate::config::{LoaderConfig, UnloadPolicy};
use crate::error::{Error, Result};
use crate::loader::{ClassLoader, PluginHandle};
use crate::registry::Registry;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns one [`ClassLoader`] per library path.
///
/// Loaders are created by the first `load_library` for a path and kept in
/// insertion order. `create_instance` without a path walks them in that
/// order, so earlier libraries win when class names collide.
pub struct MultiClassLoader {
    on_demand: bool,
    unload_policy: UnloadPolicy,
    registry: Arc<Registry>,
    loaders: RwLock<Vec<ClassLoader>>,
}

impl fmt::Debug for MultiClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiClassLoader")
            .field("on_demand", &self.on_demand)
            .field("unload_policy", &self.unload_policy)
            .field("libraries", &self.registered_libraries())
            .finish()
    }
}

impl MultiClassLoader {
    /// Empty multi-loader on the global registry
    pub fn new(on_demand: bool) -> Self {
        Self {
            on_demand,
            unload_policy: UnloadPolicy::default(),
            registry: Registry::global(),
            loaders: RwLock::new(Vec::new()),
        }
    }

    /// Start configuring a multi-loader
    pub fn builder() -> MultiClassLoaderBuilder {
        MultiClassLoaderBuilder::default()
    }

    /// Build a multi-loader from `config` on the global registry and load
    /// every configured library
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Whether new loaders are on-demand
    pub fn is_on_demand(&self) -> bool {
        self.on_demand
    }

    /// Load `path`, creating its loader on first use.
    ///
    /// An on-demand loader is created without opening the library; it opens
    /// on the first `create_instance`.
    pub fn load_library(&self, path: &str) -> Result<()> {
        let mut loaders = self.loaders.write();

        if let Some(loader) = loaders.iter().find(|l| l.library_path() == path) {
            if loader.is_on_demand() {
                return Ok(());
            }
            return loader.load_library();
        }

        let loader = ClassLoader::builder(path)
            .on_demand(self.on_demand)
            .unload_policy(self.unload_policy)
            .registry(Arc::clone(&self.registry))
            .build()?;

        debug!(library = %path, loader = %loader.owner_id(), "Class loader created");
        loaders.push(loader);
        Ok(())
    }

    /// Undo one `load_library(path)`.
    ///
    /// The loader is dropped once its load count reaches zero.
    pub fn unload_library(&self, path: &str) -> Result<()> {
        let mut loaders = self.loaders.write();

        let index = loaders
            .iter()
            .position(|l| l.library_path() == path)
            .ok_or_else(|| Error::LibraryNotRegistered(path.to_string()))?;

        loaders[index].unload_library()?;

        if loaders[index].load_count() == 0 {
            let loader = loaders.remove(index);
            debug!(library = %path, loader = %loader.owner_id(), "Class loader removed");
        }
        Ok(())
    }

    /// Create `class_name` from the first library that provides it.
    ///
    /// A library that fails to load is skipped with a warning; the search
    /// only fails once no library is left.
    pub fn create_instance<B: ?Sized + 'static>(&self, class_name: &str) -> Result<PluginHandle<B>> {
        let loaders = self.loaders.read();
        let mut last_error = None;

        for loader in loaders.iter() {
            match loader.try_create_instance::<B>(class_name) {
                Ok(Ok(handle)) => return Ok(handle),
                Ok(Err(_)) => {}
                Err(e) => {
                    warn!(
                        class = %class_name,
                        library = %loader.library_path(),
                        error = %e,
                        "Skipping library during class search"
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(e) => format!(
                "no library provides it ({} searched, last error: {e})",
                loaders.len()
            ),
            None => format!("no loaded library provides it ({} searched)", loaders.len()),
        };
        Err(Error::create_class(class_name, std::any::type_name::<B>(), reason))
    }

    /// Create `class_name` from the library at `path` only
    pub fn create_instance_from<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        path: &str,
    ) -> Result<PluginHandle<B>> {
        let loaders = self.loaders.read();

        loaders
            .iter()
            .find(|l| l.library_path() == path)
            .ok_or_else(|| Error::LibraryNotRegistered(path.to_string()))?
            .create_instance::<B>(class_name)
    }

    /// Classes implementing `B` across every library, in library order
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        let mut classes: Vec<String> = Vec::new();
        for loader in self.loaders.read().iter() {
            for class in loader.available_classes::<B>() {
                if !classes.contains(&class) {
                    classes.push(class);
                }
            }
        }
        classes
    }

    /// Classes implementing `B` in the library at `path`
    pub fn available_classes_for_library<B: ?Sized + 'static>(&self, path: &str) -> Result<Vec<String>> {
        self.loaders
            .read()
            .iter()
            .find(|l| l.library_path() == path)
            .map(|l| l.available_classes::<B>())
            .ok_or_else(|| Error::LibraryNotRegistered(path.to_string()))
    }

    /// Whether any library provides `class_name` as a `B`
    pub fn is_class_available<B: ?Sized + 'static>(&self, class_name: &str) -> bool {
        self.loaders
            .read()
            .iter()
            .any(|l| l.is_class_available::<B>(class_name))
    }

    /// Whether a loader exists for `path`
    pub fn is_library_available(&self, path: &str) -> bool {
        self.loaders.read().iter().any(|l| l.library_path() == path)
    }

    /// Library paths with a loader, in insertion order
    pub fn registered_libraries(&self) -> Vec<String> {
        self.loaders
            .read()
            .iter()
            .map(|l| l.library_path().to_string())
            .collect()
    }
}

impl Drop for MultiClassLoader {
    fn drop(&mut self) {
        let loaders = std::mem::take(self.loaders.get_mut());
        if !loaders.is_empty() {
            debug!(count = loaders.len(), "Dropping class loaders");
        }
        drop(loaders);
    }
}

/// Builder for [`MultiClassLoader`]
#[derive(Debug, Default)]
pub struct MultiClassLoaderBuilder {
    on_demand: bool,
    unload_policy: UnloadPolicy,
    registry: Option<Arc<Registry>>,
    libraries: Vec<String>,
}

impl MultiClassLoaderBuilder {
    /// Create loaders in on-demand mode
    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    /// Unload policy for every loader
    pub fn unload_policy(mut self, policy: UnloadPolicy) -> Self {
        self.unload_policy = policy;
        self
    }

    /// Use `registry` instead of [`Registry::global`]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Load `path` when building
    pub fn library(mut self, path: impl Into<String>) -> Self {
        self.libraries.push(path.into());
        self
    }

    /// Take mode, policy and the resolved library list from `config`
    pub fn config(mut self, config: &LoaderConfig) -> Self {
        self.on_demand = config.on_demand;
        self.unload_policy = config.unload_policy;
        self.libraries.extend(config.resolved_libraries());
        self
    }

    /// Build the multi-loader and load every requested library
    pub fn build(self) -> Result<MultiClassLoader> {
        let multi = MultiClassLoader {
            on_demand: self.on_demand,
            unload_policy: self.unload_policy,
            registry: self.registry.unwrap_or_else(Registry::global),
            loaders: RwLock::new(Vec::new()),
        };

        for path in &self.libraries {
            multi.load_library(path)?;
        }

        if !self.libraries.is_empty() {
            info!(
                libraries = self.libraries.len(),
                on_demand = multi.on_demand,
                "Multi class loader ready"
            );
        }
        Ok(multi)
    }
}
