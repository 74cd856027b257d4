//! Restores the parent environment after sandbox activation.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;

/// Snapshot of the process environment, restored on drop.
///
/// `birdcage` strips variables from the calling process while it prepares
/// the child; the trampoline keeps running afterwards and needs them back.
#[derive(Debug)]
pub struct EnvGuard {
    original: HashMap<OsString, OsString>,
}

impl EnvGuard {
    /// Captures the current environment.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            original: env::vars_os().collect(),
        }
    }

    pub(crate) fn restore(&self) {
        for (key, _) in env::vars_os() {
            if !self.original.contains_key(&key) {
                // SAFETY: sandbox activation only happens on a single-threaded
                // process, checked before the guard is captured.
                unsafe { env::remove_var(&key) };
            }
        }

        for (key, value) in &self.original {
            // SAFETY: as above.
            unsafe { env::set_var(key, value) };
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
