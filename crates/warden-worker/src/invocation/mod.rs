//! The view a registered call has of its arguments and environment.

use std::sync::Arc;

use warden_core::{ParceledPayload, RemoteException, TaintSet, WireValue};

use crate::capability::TrustedApi;
use crate::context::PackageContext;
use crate::handle::SandboxObject;
use crate::object::{Object, ObjectIds, SandboxValue};

/// One unpacked argument.
#[derive(Debug)]
pub(crate) enum Arg {
    /// Passed as null, or sync-only and skipped.
    Null,
    /// Passed by value; the call owns it.
    Owned(Object),
    /// Passed by handle; the handle keeps owning it.
    Shared(Arc<SandboxObject>),
}

impl Arg {
    fn with_object<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Object) -> Result<R, RemoteException>,
    ) -> Result<R, RemoteException> {
        match self {
            Self::Null => Err(RemoteException::illegal_argument(format!(
                "argument {index} is null"
            ))),
            Self::Owned(object) => f(object),
            Self::Shared(handle) => handle.with_value(f),
        }
    }
}

/// Arguments and services handed to a running call.
///
/// Arguments are indexed in declaration order with an instance receiver at
/// position 0.
pub struct Invocation<'a> {
    args: Vec<Arg>,
    replacements: Vec<Option<Object>>,
    taint: &'a TaintSet,
    ids: &'a ObjectIds,
    context: &'a PackageContext,
    trusted: TrustedApi<'a>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        args: Vec<Arg>,
        taint: &'a TaintSet,
        ids: &'a ObjectIds,
        context: &'a PackageContext,
        trusted: TrustedApi<'a>,
    ) -> Self {
        let replacements = args.iter().map(|_| None).collect();
        Self {
            args,
            replacements,
            taint,
            ids,
            context,
            trusted,
        }
    }

    /// Number of arguments, receiver included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the call takes no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether argument `index` is null.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.args.get(index), None | Some(Arg::Null))
    }

    /// Copies argument `index` out as `T`.
    ///
    /// # Errors
    ///
    /// Returns an illegal-argument exception for a missing, null or
    /// mistyped argument, or a handle-destroyed exception.
    pub fn arg<T>(&mut self, index: usize) -> Result<T, RemoteException>
    where
        T: WireValue + Clone + Send + 'static,
    {
        self.arg_slot(index)?
            .with_object(index, |object| object.get::<T>().cloned())
    }

    /// Copies argument `index` out as `T`, or `None` when it is null.
    ///
    /// # Errors
    ///
    /// As for [`Invocation::arg`], except that null is not an error.
    pub fn opt_arg<T>(&mut self, index: usize) -> Result<Option<T>, RemoteException>
    where
        T: WireValue + Clone + Send + 'static,
    {
        if self.is_null(index) {
            return Ok(None);
        }
        self.arg(index).map(Some)
    }

    /// Mutates argument `index` in place, keeping its identity.
    ///
    /// # Errors
    ///
    /// As for [`Invocation::arg`].
    pub fn with_arg_mut<T, R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RemoteException>
    where
        T: WireValue + Send + 'static,
    {
        self.arg_slot(index)?
            .with_object(index, |object| object.get_mut::<T>().map(f))
    }

    /// Replaces argument `index` with a different object.
    ///
    /// Only `ref-inout` and `out` arguments may be replaced; replacing an
    /// `inout` argument fails the call once it returns.
    ///
    /// # Errors
    ///
    /// Returns an illegal-argument exception for an index out of range.
    pub fn replace(&mut self, index: usize, value: Object) -> Result<(), RemoteException> {
        let slot = self.replacements.get_mut(index).ok_or_else(|| {
            RemoteException::illegal_argument(format!("argument {index} out of range"))
        })?;
        *slot = Some(value);
        Ok(())
    }

    /// Wraps a value in a new object owned by this worker.
    #[must_use]
    pub fn object<T: SandboxValue>(&self, value: T) -> Object {
        self.ids.wrap(value)
    }

    /// Wraps an encoded payload in a new object without decoding it.
    #[must_use]
    pub fn object_encoded(&self, payload: ParceledPayload) -> Object {
        self.ids.wrap_encoded(payload)
    }

    /// Wraps a value as the call's return value.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches registered handlers.
    pub fn returning<T: SandboxValue>(&self, value: T) -> Result<Option<Object>, RemoteException> {
        Ok(Some(self.object(value)))
    }

    /// Taint of the calling context.
    #[must_use]
    pub const fn taint(&self) -> &TaintSet {
        self.taint
    }

    /// Package the call runs in.
    #[must_use]
    pub fn package(&self) -> &str {
        self.context.package()
    }

    /// Runs `f` against the package's state of type `S`.
    pub fn package_state<S, R>(&self, f: impl FnOnce(&mut S) -> R) -> R
    where
        S: Default + Send + 'static,
    {
        self.context.with_state(f)
    }

    /// Capabilities granted to this worker.
    pub const fn trusted(&mut self) -> &mut TrustedApi<'a> {
        &mut self.trusted
    }

    pub(crate) fn finish(self) -> (Vec<Arg>, Vec<Option<Object>>) {
        (self.args, self.replacements)
    }

    fn arg_slot(&mut self, index: usize) -> Result<&mut Arg, RemoteException> {
        self.args.get_mut(index).ok_or_else(|| {
            RemoteException::illegal_argument(format!("argument {index} out of range"))
        })
    }
}

impl std::fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("args", &self.args)
            .field("package", &self.context.package())
            .finish_non_exhaustive()
    }
}
