//! Calls submitted to the sandbox pool and their outcomes.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use warden_core::{CallDescriptor, CallFlags, RETURN_VALUE, RemoteException, TaintSet};

use crate::error::HostError;
use crate::handle::{HostArg, HostHandle};

/// A call to run in some sandbox.
///
/// ```
/// use warden_core::{CallFlags, CallKind, ComponentName, DescriptorBuilder};
/// use wardend::{HostArg, HostCall};
///
/// let component = ComponentName::new("warden", "Notify").expect("name");
/// let descriptor = DescriptorBuilder::new(CallKind::Static, component)
///     .method("toast")
///     .param::<String>()
///     .build()
///     .expect("descriptor");
/// let call = HostCall::new(descriptor)
///     .arg(HostArg::value(&String::from("hello")).expect("encode"))
///     .flags(CallFlags::NO_RETURN_VALUE);
/// assert!(call.call_flags().is_async());
/// ```
#[derive(Debug, Clone)]
pub struct HostCall {
    descriptor: CallDescriptor,
    flags: CallFlags,
    args: Vec<HostArg>,
    taint: TaintSet,
    best_match: bool,
}

impl HostCall {
    /// Starts a call to `descriptor` with no arguments.
    #[must_use]
    pub fn new(descriptor: CallDescriptor) -> Self {
        Self {
            descriptor,
            flags: CallFlags::empty(),
            args: Vec::new(),
            taint: TaintSet::empty(),
            best_match: false,
        }
    }

    /// Appends an argument. Instance calls take the receiver first.
    #[must_use]
    pub fn arg(mut self, arg: HostArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Replaces the dispatch flags.
    #[must_use]
    pub const fn flags(mut self, flags: CallFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds taint beyond that of the handle arguments.
    #[must_use]
    pub fn taint(mut self, taint: &TaintSet) -> Self {
        self.taint = self.taint.merge(taint);
        self
    }

    /// Accepts a unique method name when parameter types differ.
    #[must_use]
    pub const fn best_match(mut self, allowed: bool) -> Self {
        self.best_match = allowed;
        self
    }

    /// Call target.
    #[must_use]
    pub const fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// Dispatch flags.
    #[must_use]
    pub const fn call_flags(&self) -> CallFlags {
        self.flags
    }

    /// Arguments in declaration order.
    #[must_use]
    pub fn args(&self) -> &[HostArg] {
        &self.args
    }

    /// Extra taint plus the taint of every handle argument.
    #[must_use]
    pub fn inbound_taint(&self) -> TaintSet {
        self.args
            .iter()
            .filter_map(HostArg::as_handle)
            .fold(self.taint.clone(), |taint, handle| taint.merge(handle.taint()))
    }

    /// Whether the descriptor may be resolved by method name alone.
    #[must_use]
    pub const fn allows_best_match(&self) -> bool {
        self.best_match
    }

    pub(crate) fn into_parts(self) -> (CallDescriptor, CallFlags, Vec<HostArg>) {
        (self.descriptor, self.flags, self.args)
    }
}

/// Outcome of a call: either the callee's failure or its outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct HostResult {
    sandbox: usize,
    outcome: Result<BTreeMap<i32, Option<HostHandle>>, RemoteException>,
}

impl HostResult {
    pub(crate) const fn failed(sandbox: usize, exception: RemoteException) -> Self {
        Self {
            sandbox,
            outcome: Err(exception),
        }
    }

    pub(crate) const fn completed(
        sandbox: usize,
        outputs: BTreeMap<i32, Option<HostHandle>>,
    ) -> Self {
        Self {
            sandbox,
            outcome: Ok(outputs),
        }
    }

    /// Slot that ran the call.
    #[must_use]
    pub const fn sandbox(&self) -> usize {
        self.sandbox
    }

    /// True when the callee failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// The callee's failure, without raising it.
    #[must_use]
    pub fn throwable(&self) -> Option<&RemoteException> {
        self.outcome.as_ref().err()
    }

    /// Output at `index`, `-1` being the return value.
    ///
    /// # Errors
    ///
    /// Returns the callee's exception when the call failed.
    pub fn output(&self, index: i32) -> Result<Option<&HostHandle>, RemoteException> {
        match &self.outcome {
            Ok(outputs) => Ok(outputs.get(&index).and_then(Option::as_ref)),
            Err(exception) => Err(exception.clone()),
        }
    }

    /// The return value.
    ///
    /// # Errors
    ///
    /// As for [`HostResult::output`].
    pub fn return_value(&self) -> Result<Option<&HostHandle>, RemoteException> {
        self.output(RETURN_VALUE)
    }

    /// Converts into a standard result.
    ///
    /// # Errors
    ///
    /// Returns the callee's exception when the call failed.
    pub fn into_result(self) -> Result<BTreeMap<i32, Option<HostHandle>>, RemoteException> {
        self.outcome
    }
}

/// A call that may still be running.
#[derive(Debug)]
pub enum PendingCall {
    /// The call ran synchronously.
    Ready(Result<HostResult, HostError>),
    /// The call runs on a pool thread.
    Waiting(Receiver<Result<HostResult, HostError>>),
}

impl PendingCall {
    /// Blocks until the call finishes.
    ///
    /// # Errors
    ///
    /// Returns the host failure that stopped the call, or
    /// [`HostError::Abandoned`] when the pool thread went away.
    pub fn wait(self) -> Result<HostResult, HostError> {
        match self {
            Self::Ready(result) => result,
            Self::Waiting(receiver) => receiver.recv().map_err(|_| HostError::Abandoned)?,
        }
    }

    /// Whether the caller was not blocked.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        matches!(self, Self::Waiting(_))
    }
}

#[cfg(test)]
mod tests;
