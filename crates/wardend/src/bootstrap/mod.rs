//! Daemon bootstrap orchestration.
//!
//! Bootstrap loads the configuration, installs telemetry, reads package
//! manifests and wires the sandbox pool. No worker starts here: slots are
//! launched on first use.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use warden_config::{Config, ConfigError};
use warden_policy::{ManifestRegistry, PolicyParseError, SinkRegistry};
use warden_worker::{ModuleRegistry, RegistryError};

use crate::channel::launcher_for;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::pool::{PoolSettings, SandboxManager};
use crate::services::TrustedServices;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = "wardend::bootstrap";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's [`ConfigError`].
    fn load(&self) -> Result<Config, Arc<ConfigError>>;
}

/// Loader that delegates to [`Config::resolve`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<ConfigError>> {
        Config::resolve().map_err(Arc::new)
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<ConfigError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<ConfigError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// A package manifest could not be loaded.
    #[error("failed to load package manifests: {source}")]
    Manifests {
        /// Underlying manifest error.
        #[source]
        source: PolicyParseError,
    },
    /// The worker modules are inconsistent.
    #[error("failed to register worker modules: {source}")]
    Registry {
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },
}

impl BootstrapError {
    /// True when the configuration layer only wanted to print help or
    /// version text.
    #[must_use]
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Configuration { source } if source.is_informational())
    }
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    manager: SandboxManager,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The sandbox pool.
    #[must_use]
    pub const fn manager(&self) -> &SandboxManager {
        &self.manager
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Health reporter shared with the pool.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }

    /// Drains event deliveries and stops every worker.
    pub fn shutdown(self) {
        info!(target: BOOTSTRAP_TARGET, "stopping sandboxes");
        self.manager.shutdown();
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the daemon with the system loader, the structured reporter
/// and the built-in worker modules.
///
/// # Errors
///
/// As for [`bootstrap_with`], plus [`BootstrapError::Registry`] when the
/// built-in modules fail to register.
pub fn bootstrap() -> Result<Daemon, BootstrapError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    let modules = ModuleRegistry::with_builtins()
        .map_err(|source| BootstrapError::Registry { source })?;
    bootstrap_with(&SystemConfigLoader, reporter, Arc::new(modules))
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// `modules` serves in-process workers; process workers carry their own.
///
/// # Errors
///
/// Returns [`BootstrapError`] for the first stage that fails, after
/// reporting it.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    modules: Arc<ModuleRegistry>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let manifests = match load_manifests(&config) {
        Ok(manifests) => manifests,
        Err(source) => {
            let error = BootstrapError::Manifests { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let services = TrustedServices::new(Arc::new(manifests), config.push_endpoint());
    let manager = SandboxManager::new(
        PoolSettings::from_config(&config),
        launcher_for(&config, modules),
        services,
        Arc::clone(&reporter),
    );
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        manager,
        telemetry,
        reporter,
    })
}

fn load_manifests(config: &Config) -> Result<ManifestRegistry, PolicyParseError> {
    match config.manifest_dir() {
        Some(dir) => ManifestRegistry::load_dir(dir.as_std_path(), &SinkRegistry::with_defaults()),
        None => Ok(ManifestRegistry::new()),
    }
}

#[cfg(test)]
mod tests;
