use crate::launch::LaunchMode;
use crate::logging::LogFormat;

/// Largest pool the sandbox index bits in a call's flags can address.
pub const MAX_POOL_SIZE: usize = 16;

/// Default number of worker slots.
pub const DEFAULT_POOL_SIZE: usize = MAX_POOL_SIZE;

/// Default worker executable, resolved next to the daemon binary when
/// relative.
pub const DEFAULT_WORKER_EXECUTABLE: &str = "warden-worker";

/// Seconds a worker may take to exit after a graceful stop.
pub const DEFAULT_KILL_GRACE_PERIOD_SECS: u64 = 15;

/// Seconds a worker may take to report ready after binding.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Endpoint the `push` capability posts notifications to.
pub const DEFAULT_PUSH_ENDPOINT: &str = "https://api.pushbullet.com/v2/pushes";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default worker launch mode.
#[must_use]
pub const fn default_launch_mode() -> LaunchMode {
    LaunchMode::Sandboxed
}
