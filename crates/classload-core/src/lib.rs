//! # classload-core
//!
//! Create objects by class name from native plugin libraries loaded at run
//! time.
//!
//! ## Features
//!
//! - **Registry**: factories keyed by interface type and class name, plus the
//!   table of open libraries, all behind one lock
//! - **Class loaders**: per-loader visibility, nested load/unload counts and
//!   live-instance tracking so a library never closes under a live object
//! - **On-demand mode**: open on first use, close with the last instance
//! - **Multi-loader**: several libraries searched as one namespace
//! - **Backends**: `libloading` for real shared objects, an in-process
//!   backend for code linked into the host
//!
//! ## Example
//!
//! ```rust,no_run
//! use classload_core::{ClassLoader, Result};
//!
//! pub trait Shape: Send + Sync {
//!     fn area(&self) -> f64;
//! }
//!
//! fn main() -> Result<()> {
//!     let loader = ClassLoader::new("libshapes.so", false)?;
//!
//!     for name in loader.available_classes::<dyn Shape>() {
//!         let shape = loader.create_instance::<dyn Shape>(&name)?;
//!         println!("{name}: {}", shape.area());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! A plugin library exports its classes with
//! [`declare_plugin_library!`]. Host and plugins must be built with the same
//! compiler and the same version of this crate.

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod backend;
pub mod config;
pub mod error;
mod factory;
pub mod global;
pub mod interface;
pub mod loader;
pub mod multi;
mod ownership;
pub mod registrar;
pub mod registry;

pub use backend::{library_filename, BackendError, InProcessBackend, LibraryBackend, NativeBackend};
pub use config::{ConfigFormat, LoaderConfig, UnloadPolicy};
pub use error::{Error, Result};
pub use interface::{InterfaceId, OwnerId};
pub use loader::{ClassLoader, ClassLoaderBuilder, PluginHandle};
pub use multi::{MultiClassLoader, MultiClassLoaderBuilder};
pub use registrar::{RegisterFn, Registrar, REGISTER_SYMBOL};
pub use registry::{ClassInfo, Registry, STATIC_LIBRARY};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::config::{LoaderConfig, UnloadPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::loader::{ClassLoader, PluginHandle};
    pub use crate::multi::MultiClassLoader;
    pub use crate::registrar::Registrar;
    pub use crate::{declare_plugin_library, register_class};
}
