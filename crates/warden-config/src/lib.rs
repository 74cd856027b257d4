//! Configuration for the warden daemon.
//!
//! Values are layered by `ortho_config` from lowest to highest precedence:
//!
//! 1. built-in defaults ([`defaults`]),
//! 2. a TOML file (`--config-path`, `WARDEN_CONFIG_PATH`, or a discovered
//!    `.warden.toml`),
//! 3. `WARDEN_*` environment variables,
//! 4. command-line flags.
//!
//! [`Config::resolve_from_iter`] performs the merge and then validates the
//! result, failing fast on the first invalid value.

pub mod defaults;
mod error;
mod launch;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use url::Url;

pub use crate::defaults::{
    DEFAULT_KILL_GRACE_PERIOD_SECS, DEFAULT_LOG_FILTER, DEFAULT_POOL_SIZE,
    DEFAULT_PUSH_ENDPOINT, DEFAULT_READY_TIMEOUT_SECS, DEFAULT_WORKER_EXECUTABLE, MAX_POOL_SIZE,
    default_launch_mode, default_log_filter, default_log_format,
};
pub use crate::error::ConfigError;
pub use crate::launch::LaunchMode;
pub use crate::logging::{LogFormat, LogFormatParseError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// Number of worker slots (1 to 16).
    pool_size: usize,
    /// How workers are started: sandboxed, process, or in_process.
    launch_mode: LaunchMode,
    /// Worker binary.
    worker_executable: Utf8PathBuf,
    /// Packages whose execution contexts every worker warms at bind time.
    preload_packages: Vec<String>,
    /// Seconds to wait for a worker after a graceful stop.
    kill_grace_period_secs: u64,
    /// Seconds to wait for a worker to report ready.
    ready_timeout_secs: u64,
    /// Directory of package manifests.
    manifest_dir: Option<Utf8PathBuf>,
    /// Endpoint the push capability posts to.
    push_endpoint: Option<Url>,
    /// Tracing filter expression.
    log_filter: String,
    /// Log output: json or compact.
    log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            launch_mode: default_launch_mode(),
            worker_executable: Utf8PathBuf::from(DEFAULT_WORKER_EXECUTABLE),
            preload_packages: Vec::new(),
            kill_grace_period_secs: DEFAULT_KILL_GRACE_PERIOD_SECS,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            manifest_dir: None,
            push_endpoint: None,
            log_filter: String::from(default_log_filter()),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Resolves the configuration from the process arguments and
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`Config::resolve_from_iter`].
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from_iter(std::env::args_os())
    }

    /// Resolves the configuration from explicit arguments, the first being
    /// the program name. Environment variables and configuration files are
    /// still consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or parsed,
    /// or a validation error for values out of range.
    pub fn resolve_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = <Self as OrthoConfig>::load_from_iter(args).map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_POOL_SIZE).contains(&self.pool_size) {
            return Err(ConfigError::PoolSize {
                value: self.pool_size,
            });
        }
        if self.ready_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "ready_timeout_secs",
            });
        }
        if let Some(entry) = self
            .preload_packages
            .iter()
            .find(|entry| !is_package_name(entry))
        {
            return Err(ConfigError::PreloadPackage {
                entry: entry.clone(),
            });
        }
        Ok(())
    }

    /// Number of worker slots.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// How workers are started.
    #[must_use]
    pub const fn launch_mode(&self) -> LaunchMode {
        self.launch_mode
    }

    /// Worker binary as configured, possibly relative.
    #[must_use]
    pub fn worker_executable(&self) -> &Utf8Path {
        &self.worker_executable
    }

    /// Packages preloaded by every worker.
    #[must_use]
    pub fn preload_packages(&self) -> &[String] {
        &self.preload_packages
    }

    /// Time a worker gets to exit after a graceful stop.
    #[must_use]
    pub const fn kill_grace_period(&self) -> Duration {
        Duration::from_secs(self.kill_grace_period_secs)
    }

    /// Time a worker gets to report ready.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Directory of package manifests, if any.
    #[must_use]
    pub fn manifest_dir(&self) -> Option<&Utf8Path> {
        self.manifest_dir.as_deref()
    }

    /// Endpoint the push capability posts to.
    #[must_use]
    pub fn push_endpoint(&self) -> &str {
        self.push_endpoint
            .as_ref()
            .map_or(DEFAULT_PUSH_ENDPOINT, Url::as_str)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Replaces the launch mode.
    #[must_use]
    pub const fn with_launch_mode(mut self, launch_mode: LaunchMode) -> Self {
        self.launch_mode = launch_mode;
        self
    }

    /// Replaces the pool size. Out-of-range values are clamped to `1..=16`.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.clamp(1, MAX_POOL_SIZE);
        self
    }

    /// Replaces the preload list.
    #[must_use]
    pub fn with_preload_packages(mut self, packages: Vec<String>) -> Self {
        self.preload_packages = packages;
        self
    }

    /// Replaces the manifest directory.
    #[must_use]
    pub fn with_manifest_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.manifest_dir = Some(dir.into());
        self
    }

    /// Replaces the worker executable.
    #[must_use]
    pub fn with_worker_executable(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.worker_executable = path.into();
        self
    }
}

/// Shared loader error, as handed out by `ortho_config`.
pub type LoadError = Arc<ortho_config::OrthoError>;

fn is_package_name(entry: &str) -> bool {
    !entry.is_empty()
        && entry
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}
