use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the daemon starts its workers.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LaunchMode {
    /// Worker processes confined by `warden-sandbox`.
    #[default]
    Sandboxed,
    /// Plain worker processes without confinement.
    Process,
    /// Workers served on threads inside the daemon. Test and debug only.
    InProcess,
}

impl LaunchMode {
    /// True when workers run as separate processes.
    #[must_use]
    pub const fn spawns_processes(self) -> bool {
        !matches!(self, Self::InProcess)
    }
}
