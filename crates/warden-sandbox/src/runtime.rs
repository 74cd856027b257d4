//! Platform helpers for sandbox defaults and preflight checks.

use std::fs;
use std::io;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
const RUNTIME_ROOTS: [&str; 6] = [
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/lib/x86_64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
];

/// Standard Linux library paths that stay readable inside the cage.
#[must_use]
pub(crate) fn linux_runtime_roots() -> Vec<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        RUNTIME_ROOTS
            .iter()
            .filter_map(|root| fs::canonicalize(root).ok())
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

/// Returns the number of threads in the current process.
///
/// # Errors
///
/// Returns an I/O error when `/proc/self/status` cannot be read or carries
/// no parsable `Threads:` line.
pub fn thread_count() -> io::Result<usize> {
    #[cfg(target_os = "linux")]
    {
        let status = fs::read_to_string("/proc/self/status")?;
        let count = status
            .lines()
            .find_map(|line| line.strip_prefix("Threads:"))
            .map(str::trim)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing thread count"))?;
        count
            .parse::<usize>()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(1)
    }
}
