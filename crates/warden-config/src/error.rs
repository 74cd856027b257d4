use ortho_config::OrthoError;
use thiserror::Error;

use crate::LoadError;
use crate::defaults::MAX_POOL_SIZE;

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read, parsed or merged, or the
    /// command line asked for help or version text.
    #[error(transparent)]
    Load(LoadError),

    /// The pool size is outside `1..=16`.
    #[error("pool_size must be between 1 and {MAX_POOL_SIZE}, got {value}")]
    PoolSize {
        /// Rejected value.
        value: usize,
    },

    /// A timeout was configured as zero.
    #[error("{name} must be greater than zero")]
    ZeroTimeout {
        /// Setting name.
        name: &'static str,
    },

    /// A preload entry is not a package name.
    #[error("preload_packages entry '{entry}' is not a package name")]
    PreloadPackage {
        /// Rejected entry.
        entry: String,
    },
}

impl ConfigError {
    /// The command-line error behind this failure, if any.
    #[must_use]
    pub fn cli_error(&self) -> Option<&clap::Error> {
        match self {
            Self::Load(source) => match source.as_ref() {
                OrthoError::CliParsing(error) => Some(error),
                _ => None,
            },
            Self::PoolSize { .. } | Self::ZeroTimeout { .. } | Self::PreloadPackage { .. } => None,
        }
    }

    /// True when clap wants to print help or version text rather than fail.
    #[must_use]
    pub fn is_informational(&self) -> bool {
        self.cli_error().is_some_and(|error| {
            matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            )
        })
    }
}
