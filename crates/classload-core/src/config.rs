//! Loader configuration

use crate::backend::library_filename;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What `unload_library` does while instances are still alive.
///
/// Either way the library stays loaded and the load count is untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnloadPolicy {
    /// Log a warning and return `Ok(())`
    #[default]
    Warn,
    /// Return [`Error::InstancesStillLive`]
    Strict,
}

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML
    Toml,
    /// YAML
    Yaml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            other => Err(Error::config(format!(
                "Unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

/// Settings for a set of class loaders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Load lazily and unload with the last live instance
    pub on_demand: bool,

    /// Behaviour of unload while instances are alive
    pub unload_policy: UnloadPolicy,

    /// Directories searched for bare library names
    pub search_paths: Vec<PathBuf>,

    /// Libraries to load, as bare names (`shapes`) or paths
    pub libraries: Vec<String>,
}

impl LoaderConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file {}: {e}", path.display())))?;

        let format = ConfigFormat::from_path(path)?;

        Self::from_str_with_format(&content, format)
    }

    /// Parse configuration text
    pub fn from_str_with_format(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| Error::config(format!("Failed to parse YAML: {e}")))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::config(format!("Failed to parse JSON: {e}")))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject empty or duplicate library entries
    pub fn validate(&self) -> Result<()> {
        for (i, library) in self.libraries.iter().enumerate() {
            if library.trim().is_empty() {
                return Err(Error::config(format!("Library entry {i} is empty")));
            }
            if self.libraries[..i].contains(library) {
                return Err(Error::config(format!("Library '{library}' is listed twice")));
            }
        }
        Ok(())
    }

    /// Turn a library entry into the path handed to the backend.
    ///
    /// Entries with a directory component or an extension are used as-is.
    /// Bare names become the platform file name (`shapes` →
    /// `libshapes.so`) and are looked up in the search paths; if none has
    /// the file, the bare file name is returned for the platform loader to
    /// resolve.
    pub fn resolve_library(&self, entry: &str) -> String {
        let path = Path::new(entry);
        let has_dir = path.parent().is_some_and(|p| !p.as_os_str().is_empty());
        if has_dir || path.extension().is_some() {
            return entry.to_string();
        }

        let file_name = library_filename(entry);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .map(|candidate| candidate.to_string_lossy().into_owned())
            .unwrap_or(file_name)
    }

    /// Every configured library, resolved
    pub fn resolved_libraries(&self) -> Vec<String> {
        self.libraries
            .iter()
            .map(|entry| self.resolve_library(entry))
            .collect()
    }
}
