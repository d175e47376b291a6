//! Error types for class loading

use std::fmt;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Class loader error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend could not open a library
    #[error("Failed to load library '{path}': {reason}")]
    LibraryLoad {
        /// Library path
        path: String,
        /// Backend message
        reason: String,
    },

    /// The backend could not close a library whose factories were all released
    #[error("Failed to unload library '{path}': {reason}")]
    LibraryUnload {
        /// Library path
        path: String,
        /// Backend message
        reason: String,
    },

    /// The requested class is not visible to the requesting loader
    #[error("Could not create class '{class}' for interface '{interface}': {reason}")]
    CreateClass {
        /// Requested class name
        class: String,
        /// Interface type name
        interface: &'static str,
        /// Why the lookup failed
        reason: String,
    },

    /// The (interface, class) pair already has a factory
    #[error("Class '{class}' is already registered for interface '{interface}'")]
    DuplicateClass {
        /// Class name
        class: String,
        /// Interface type name
        interface: &'static str,
    },

    /// Unload refused because objects created by the loader are still alive
    #[error("Library '{path}' still has {live} live instance(s)")]
    InstancesStillLive {
        /// Library path
        path: String,
        /// Number of live instances
        live: usize,
    },

    /// A multi-loader has no loader for the given library
    #[error("No class loader registered for library '{0}'")]
    LibraryNotRegistered(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a library load error
    pub fn library_load(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::LibraryLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a library unload error
    pub fn library_unload(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::LibraryUnload {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a class creation error
    pub fn create_class(
        class: impl Into<String>,
        interface: &'static str,
        reason: impl fmt::Display,
    ) -> Self {
        Self::CreateClass {
            class: class.into(),
            interface,
            reason: reason.to_string(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Whether the caller can recover by asking another loader or class name
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CreateClass { .. } | Error::LibraryNotRegistered(_)
        )
    }
}
