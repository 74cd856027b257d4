//! Call invocation flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Bits of [`CallFlags`] that carry an explicit sandbox index.
pub const SANDBOX_NUM_MASK: u32 = 0xF;

/// Upper bound on the sandbox pool size.
pub const NUM_SANDBOXES: usize = 16;

bitflags! {
    /// Bitmask controlling how a single call is dispatched.
    ///
    /// The low four bits hold a sandbox index that only applies together with
    /// [`CallFlags::OVERRIDE_SANDBOX`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallFlags: u32 {
        /// Do not block on the result.
        const ASYNC = 0x8000_0000;
        /// Treat [`CallFlags::ASYNC`] as authoritative instead of deriving
        /// the mode from the return value.
        const FORCE_SYNC_ASYNC = 0x4000_0000;
        /// Discard the return value entirely.
        const NO_RETURN_VALUE = 0x2000_0000;
        /// Log callee failures and complete with empty outputs.
        const FILTER_EXCEPTIONS = 0x1000_0000;
        /// Use the sandbox index held in the low bits.
        const OVERRIDE_SANDBOX = 0x0800_0000;

        const _ = SANDBOX_NUM_MASK;
    }
}

impl CallFlags {
    /// Selects an explicit sandbox index for the call.
    #[must_use]
    pub const fn with_sandbox(self, index: u32) -> Self {
        Self::from_bits_retain(
            (self.bits() & !SANDBOX_NUM_MASK)
                | (index & SANDBOX_NUM_MASK)
                | Self::OVERRIDE_SANDBOX.bits(),
        )
    }

    /// Returns the overridden sandbox index, wrapped into the pool size.
    #[must_use]
    pub fn sandbox_override(self, pool_size: usize) -> Option<usize> {
        if !self.contains(Self::OVERRIDE_SANDBOX) || pool_size == 0 {
            return None;
        }
        let index = usize::try_from(self.bits() & SANDBOX_NUM_MASK).ok()?;
        Some(index.rem_euclid(pool_size))
    }

    /// Whether the call runs without blocking the caller.
    ///
    /// Calls that produce no return value default to asynchronous dispatch
    /// unless [`CallFlags::FORCE_SYNC_ASYNC`] is set, in which case only
    /// [`CallFlags::ASYNC`] decides.
    #[must_use]
    pub const fn is_async(self) -> bool {
        if self.contains(Self::FORCE_SYNC_ASYNC) {
            self.contains(Self::ASYNC)
        } else {
            self.contains(Self::ASYNC) || self.contains(Self::NO_RETURN_VALUE)
        }
    }
}

impl From<u32> for CallFlags {
    fn from(value: u32) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<CallFlags> for u32 {
    fn from(value: CallFlags) -> Self {
        value.bits()
    }
}

impl Serialize for CallFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for CallFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}

#[cfg(test)]
mod tests;
