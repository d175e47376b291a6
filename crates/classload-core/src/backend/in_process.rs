//! Backend for libraries linked into the host process

use super::{run_registration, BackendError, LibraryBackend, LibraryHandle};
use crate::registrar::{RegisterFn, Registrar};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Open/close bookkeeping for one virtual library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryStats {
    /// Successful opens
    pub opens: usize,
    /// Successful closes
    pub closes: usize,
    /// Whether the library is open right now
    pub open: bool,
}

#[derive(Default)]
struct Shared {
    libraries: RwLock<HashMap<String, RegisterFn>>,
    stats: Mutex<HashMap<String, LibraryStats>>,
    failing_closes: Mutex<HashSet<String>>,
}

/// Publishes registration functions compiled into the host under virtual
/// library paths.
///
/// Opening a path runs its registration function exactly like a native
/// library's entry point, so classes linked statically go through the same
/// ownership and lifetime rules as dynamically loaded ones. The backend also
/// counts opens and closes per path, which makes it the natural test double.
#[derive(Clone, Default)]
pub struct InProcessBackend {
    shared: Arc<Shared>,
}

impl fmt::Debug for InProcessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut libraries: Vec<String> = self.shared.libraries.read().keys().cloned().collect();
        libraries.sort();
        f.debug_struct("InProcessBackend")
            .field("libraries", &libraries)
            .finish()
    }
}

impl InProcessBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `register` under `path`
    pub fn with_library(self, path: impl Into<String>, register: RegisterFn) -> Self {
        self.add_library(path, register);
        self
    }

    /// Publish `register` under `path`, replacing any previous entry
    pub fn add_library(&self, path: impl Into<String>, register: RegisterFn) {
        self.shared.libraries.write().insert(path.into(), register);
    }

    /// Stop publishing `path`. Already opened handles are unaffected.
    pub fn remove_library(&self, path: &str) -> bool {
        self.shared.libraries.write().remove(path).is_some()
    }

    /// Make every later close of `path` fail
    pub fn fail_close(&self, path: impl Into<String>) {
        self.shared.failing_closes.lock().insert(path.into());
    }

    /// Bookkeeping for `path`
    pub fn stats(&self, path: &str) -> LibraryStats {
        self.shared.stats.lock().get(path).copied().unwrap_or_default()
    }

    /// Successful opens of `path`
    pub fn open_count(&self, path: &str) -> usize {
        self.stats(path).opens
    }

    /// Successful closes of `path`
    pub fn close_count(&self, path: &str) -> usize {
        self.stats(path).closes
    }

    /// Whether `path` is open right now
    pub fn is_open(&self, path: &str) -> bool {
        self.stats(path).open
    }
}

impl LibraryBackend for InProcessBackend {
    fn open(
        &self,
        path: &str,
        registrar: &mut Registrar<'_>,
    ) -> Result<Box<dyn LibraryHandle>, BackendError> {
        let register = self
            .shared
            .libraries
            .read()
            .get(path)
            .copied()
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;

        if self.stats(path).open {
            return Err(BackendError::Open(format!("{path} is already open")));
        }

        run_registration(register, registrar)?;

        let mut stats = self.shared.stats.lock();
        let entry = stats.entry(path.to_string()).or_default();
        entry.opens += 1;
        entry.open = true;

        Ok(Box::new(InProcessLibrary {
            path: path.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct InProcessLibrary {
    path: String,
    shared: Arc<Shared>,
}

impl fmt::Debug for InProcessLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessLibrary")
            .field("path", &self.path)
            .finish()
    }
}

impl LibraryHandle for InProcessLibrary {
    fn is_open(&self) -> bool {
        self.shared
            .stats
            .lock()
            .get(&self.path)
            .is_some_and(|s| s.open)
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        let failing = self.shared.failing_closes.lock().contains(&self.path);

        let mut stats = self.shared.stats.lock();
        let entry = stats.entry(self.path.clone()).or_default();
        entry.open = false;

        if failing {
            return Err(BackendError::Close(format!("{} refused to close", self.path)));
        }

        entry.closes += 1;
        Ok(())
    }
}
