//! Loaded manifests, keyed by package.
//!
//! The registry is built once at startup and then shared read-only. It is an
//! ordinary value: tests and embedders may run several independent
//! registries side by side.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use tracing::{debug, info};
use warden_core::ComponentName;

use crate::error::PolicyParseError;
use crate::manifest::{ChannelDecl, PackageManifest, Source};
use crate::sink::SinkRegistry;

const REGISTRY_TARGET: &str = "warden_policy::registry";
const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Manifests available to the policy engine.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    manifests: HashMap<String, Arc<PackageManifest>>,
}

impl ManifestRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyParseError::DuplicatePackage`] when the package is
    /// already registered.
    pub fn register(&mut self, manifest: PackageManifest) -> Result<(), PolicyParseError> {
        let package = manifest.package().to_owned();
        if self.manifests.contains_key(&package) {
            return Err(PolicyParseError::DuplicatePackage { package });
        }
        debug!(target: REGISTRY_TARGET, %package, "registered manifest");
        self.manifests.insert(package, Arc::new(manifest));
        Ok(())
    }

    /// Loads every `*.yaml` and `*.yml` manifest in `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyParseError::Io`] when the directory cannot be read and
    /// [`PolicyParseError::File`] wrapping the first manifest that fails.
    pub fn load_dir(path: &Path, sinks: &SinkRegistry) -> Result<Self, PolicyParseError> {
        let io_error = |source| PolicyParseError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        };
        let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(io_error)?;
        let mut names = Vec::new();
        for entry in dir.entries().map_err(io_error)? {
            let file_name = entry.map_err(io_error)?.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let is_manifest = Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
            if is_manifest {
                names.push(name.to_owned());
            }
        }
        names.sort();

        let mut registry = Self::new();
        for name in names {
            let file = path.join(&name);
            let text = dir.read_to_string(&name).map_err(|source| PolicyParseError::Io {
                path: file.clone(),
                source: Arc::new(source),
            })?;
            PackageManifest::from_yaml(&text, sinks)
                .and_then(|manifest| registry.register(manifest))
                .map_err(|source| PolicyParseError::File {
                    path: file,
                    source: Box::new(source),
                })?;
        }
        info!(
            target: REGISTRY_TARGET,
            dir = %path.display(),
            packages = registry.len(),
            "loaded manifests"
        );
        Ok(registry)
    }

    /// Looks up a package's manifest.
    #[must_use]
    pub fn manifest(&self, package: &str) -> Option<&PackageManifest> {
        self.manifests.get(package).map(Arc::as_ref)
    }

    /// Looks up the source behind a taint label.
    #[must_use]
    pub fn source(&self, label: &ComponentName) -> Option<&Source> {
        self.manifest(label.package())?.source(label.name())
    }

    /// Looks up a declared channel.
    #[must_use]
    pub fn channel(&self, name: &ComponentName) -> Option<&ChannelDecl> {
        self.manifest(name.package())?.channel(name.name())
    }

    /// Number of registered packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Returns `true` when no packages are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

#[cfg(test)]
mod tests;
