//! Sandbox policy definition and builder helpers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::runtime::linux_runtime_roots;

/// Environment variables a worker keeps inside the cage.
///
/// These only steer logging; the control protocol itself travels over stdio.
pub const WORKER_ENVIRONMENT: [&str; 3] = ["WARDEN_LOG_FILTER", "WARDEN_LOG_FORMAT", "RUST_BACKTRACE"];

/// Environment inheritance strategy applied to sandboxed processes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentPolicy {
    /// Remove all environment variables before launching the child.
    #[default]
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
    /// Inherit the full environment unchanged.
    InheritAll,
}

/// Network access policy applied to sandboxed processes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// Block networking by entering a separate network namespace.
    #[default]
    Deny,
    /// Permit networking in the sandboxed process.
    Allow,
}

/// Declarative description of the resources a sandboxed process may access.
///
/// A fresh profile denies networking, strips the environment, and only
/// whitelists the standard Linux runtime library roots for reading.
#[derive(Debug, Clone)]
pub struct SandboxProfile {
    read_only_paths: Vec<PathBuf>,
    read_write_paths: Vec<PathBuf>,
    executable_paths: Vec<PathBuf>,
    environment: EnvironmentPolicy,
    network: NetworkPolicy,
}

impl SandboxProfile {
    /// Creates a profile with Linux runtime library paths whitelisted for
    /// read-only access.
    ///
    /// ```
    /// use warden_sandbox::SandboxProfile;
    ///
    /// let profile = SandboxProfile::new()
    ///     .allow_executable("/bin/echo")
    ///     .allow_read_write_path("/tmp/warden-sandbox");
    /// assert!(profile.network_policy().is_denied());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_only_paths: linux_runtime_roots(),
            read_write_paths: Vec::new(),
            executable_paths: Vec::new(),
            environment: EnvironmentPolicy::default(),
            network: NetworkPolicy::default(),
        }
    }

    /// Profile for a worker process.
    ///
    /// Only the worker executable may run, the network stays closed, and the
    /// environment is cut down to [`WORKER_ENVIRONMENT`]. Sandboxed code
    /// reaches the outside world exclusively through trusted-API callouts.
    #[must_use]
    pub fn for_worker(executable: impl Into<PathBuf>) -> Self {
        WORKER_ENVIRONMENT.iter().fold(
            Self::new().allow_executable(executable),
            |profile, key| profile.allow_environment_variable(*key),
        )
    }

    /// Grants execute and read access to the provided path.
    #[must_use]
    pub fn allow_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_paths.push(path.into());
        self
    }

    /// Grants read-only access to the provided path.
    #[must_use]
    pub fn allow_read_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_only_paths.push(path.into());
        self
    }

    /// Grants read-write access to the provided path.
    #[must_use]
    pub fn allow_read_write_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_write_paths.push(path.into());
        self
    }

    /// Whitelists an environment variable for inheritance.
    ///
    /// When the policy is already [`EnvironmentPolicy::InheritAll`] this is a
    /// no-op because the full environment is already permitted.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.with_allowed(key.into());
        self
    }

    /// Inherit all environment variables from the parent process.
    #[must_use]
    pub fn allow_full_environment(mut self) -> Self {
        self.environment = EnvironmentPolicy::InheritAll;
        self
    }

    /// Allows the sandboxed process to use the host network namespace.
    #[must_use]
    pub const fn allow_networking(mut self) -> Self {
        self.network = NetworkPolicy::Allow;
        self
    }

    pub(crate) fn read_only_paths(&self) -> &[PathBuf] {
        &self.read_only_paths
    }

    pub(crate) fn read_write_paths(&self) -> &[PathBuf] {
        &self.read_write_paths
    }

    pub(crate) fn executable_paths(&self) -> &[PathBuf] {
        &self.executable_paths
    }

    /// True when `path` was whitelisted verbatim as an executable.
    #[must_use]
    pub fn allows_executable(&self, path: &Path) -> bool {
        self.executable_paths.iter().any(|entry| entry == path)
    }

    /// Returns the configured environment policy.
    #[must_use]
    pub const fn environment_policy(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    /// Returns the network policy.
    #[must_use]
    pub const fn network_policy(&self) -> NetworkPolicy {
        self.network
    }
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkPolicy {
    /// Returns true when networking is denied.
    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Deny)
    }
}

impl EnvironmentPolicy {
    fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => Self::AllowList(BTreeSet::from([key])),
            Self::AllowList(mut keys) => {
                keys.insert(key);
                Self::AllowList(keys)
            }
            Self::InheritAll => Self::InheritAll,
        }
    }

    pub(crate) fn to_exceptions(&self) -> Vec<birdcage::Exception> {
        match self {
            Self::Isolated => Vec::new(),
            Self::AllowList(keys) => keys
                .iter()
                .cloned()
                .map(birdcage::Exception::Environment)
                .collect(),
            Self::InheritAll => vec![birdcage::Exception::FullEnvironment],
        }
    }
}
