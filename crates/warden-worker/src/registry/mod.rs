//! Table of calls a worker can dispatch.
//!
//! Every callable is registered up front as a [`CallSpec`]: the descriptor it
//! answers to, the direction of each argument, the declared result type, and
//! the closure that runs it. Calls are grouped per package in a
//! [`PackageModule`]; the [`ModuleRegistry`] holds every module the worker
//! ships and is immutable once built.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use warden_core::{
    CallDescriptor, CallKind, DescriptorError, Direction, RemoteException, WireValue,
};

use crate::invocation::Invocation;
use crate::object::Object;

/// Closure that executes one registered call.
pub type CallHandler =
    Arc<dyn Fn(&mut Invocation<'_>) -> Result<Option<Object>, RemoteException> + Send + Sync>;

/// Errors raised while assembling the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A call was registered in a module of another package.
    #[error("call {descriptor} does not belong to package '{package}'")]
    ForeignCall {
        /// Module package.
        package: String,
        /// Rejected call.
        descriptor: Box<CallDescriptor>,
    },

    /// The same descriptor was registered twice.
    #[error("call {descriptor} is already registered")]
    DuplicateCall {
        /// Duplicate call.
        descriptor: Box<CallDescriptor>,
    },

    /// Two modules claim the same package.
    #[error("package '{package}' is already registered")]
    DuplicatePackage {
        /// Duplicate package.
        package: String,
    },

    /// The argument directions do not fit the descriptor.
    #[error("call {descriptor} has invalid argument directions: {reason}")]
    InvalidDirection {
        /// Offending call.
        descriptor: Box<CallDescriptor>,
        /// What is wrong.
        reason: &'static str,
    },

    /// A built-in descriptor failed to build.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// One registered call.
#[derive(Clone)]
pub struct CallSpec {
    descriptor: CallDescriptor,
    directions: Vec<Direction>,
    result_type: Option<String>,
    handler: CallHandler,
}

impl CallSpec {
    /// Registers `handler` for `descriptor`.
    ///
    /// Arguments default to [`Direction::In`] and an instance receiver to
    /// [`Direction::InOut`]. Constructors declare their component as result
    /// type; methods declare none until [`CallSpec::returns`] is called.
    pub fn new<F>(descriptor: CallDescriptor, handler: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Option<Object>, RemoteException>
            + Send
            + Sync
            + 'static,
    {
        let mut directions = vec![Direction::In; descriptor.arity()];
        if matches!(descriptor.kind(), CallKind::Instance)
            && let Some(receiver) = directions.first_mut()
        {
            *receiver = Direction::InOut;
        }
        let result_type = matches!(descriptor.kind(), CallKind::Constructor)
            .then(|| descriptor.component().to_string());
        Self {
            descriptor,
            directions,
            result_type,
            handler: Arc::new(handler),
        }
    }

    /// Declares the result type.
    #[must_use]
    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.result_type = Some(type_name.into());
        self
    }

    /// Declares a wire value result.
    #[must_use]
    pub fn returns_value<T: WireValue>(self) -> Self {
        self.returns(T::TYPE_NAME)
    }

    /// Passes the instance receiver in, so the call cannot change it.
    #[must_use]
    pub fn preserves_receiver(self) -> Self {
        self.direction(0, Direction::In)
    }

    /// Sets the direction of argument `index`, counting the receiver as 0.
    /// Out-of-range indices are reported when the call is registered.
    #[must_use]
    pub fn direction(mut self, index: usize, direction: Direction) -> Self {
        match self.directions.get_mut(index) {
            Some(slot) => *slot = direction,
            None => self.directions.push(direction),
        }
        self
    }

    /// Target the call answers to.
    #[must_use]
    pub const fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// Argument directions, receiver first.
    #[must_use]
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Declared result type.
    #[must_use]
    pub fn result_type(&self) -> Option<&str> {
        self.result_type.as_deref()
    }

    /// Declared type of argument `index`, counting the receiver as 0.
    #[must_use]
    pub fn param_type(&self, index: usize) -> Option<String> {
        match self.descriptor.receiver_type() {
            Some(receiver) if index == 0 => Some(receiver),
            Some(_) => self
                .descriptor
                .param_types()
                .get(index.saturating_sub(1))
                .cloned(),
            None => self.descriptor.param_types().get(index).cloned(),
        }
    }

    pub(crate) fn handler(&self) -> &CallHandler {
        &self.handler
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason| RegistryError::InvalidDirection {
            descriptor: Box::new(self.descriptor.clone()),
            reason,
        };
        if self.directions.len() != self.descriptor.arity() {
            return Err(invalid("direction count differs from arity"));
        }
        if matches!(self.descriptor.kind(), CallKind::Instance)
            && !matches!(
                self.directions.first(),
                Some(Direction::In | Direction::InOut)
            )
        {
            return Err(invalid("the receiver must be in or inout"));
        }
        Ok(())
    }
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec")
            .field("descriptor", &self.descriptor)
            .field("directions", &self.directions)
            .field("result_type", &self.result_type)
            .finish_non_exhaustive()
    }
}

/// Calls shipped for one package.
#[derive(Debug, Clone)]
pub struct PackageModule {
    package: String,
    calls: BTreeMap<CallDescriptor, CallSpec>,
}

impl PackageModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            calls: BTreeMap::new(),
        }
    }

    /// Adds a call.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the call belongs to another package,
    /// is already registered, or has directions that do not fit.
    pub fn with_call(mut self, spec: CallSpec) -> Result<Self, RegistryError> {
        if spec.descriptor.component().package() != self.package {
            return Err(RegistryError::ForeignCall {
                package: self.package,
                descriptor: Box::new(spec.descriptor),
            });
        }
        spec.validate()?;
        if self.calls.contains_key(&spec.descriptor) {
            return Err(RegistryError::DuplicateCall {
                descriptor: Box::new(spec.descriptor),
            });
        }
        self.calls.insert(spec.descriptor.clone(), spec);
        Ok(self)
    }

    /// Package the module serves.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Finds the call for `descriptor`.
    ///
    /// With `best_match`, a descriptor whose method name is unique within
    /// its component and kind matches even when parameter types differ.
    #[must_use]
    pub fn lookup(&self, descriptor: &CallDescriptor, best_match: bool) -> Option<&CallSpec> {
        if let Some(spec) = self.calls.get(descriptor) {
            return Some(spec);
        }
        if !best_match {
            return None;
        }
        let mut candidates = self.calls.values().filter(|spec| {
            let candidate = spec.descriptor();
            candidate.kind() == descriptor.kind()
                && candidate.component() == descriptor.component()
                && candidate.method() == descriptor.method()
        });
        let first = candidates.next()?;
        candidates.next().is_none().then_some(first)
    }

    /// Number of registered calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Every module a worker ships.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<PackageModule>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `warden` module.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the built-in module is inconsistent.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        Self::new().with_module(crate::builtin::module()?)
    }

    /// Adds a module.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePackage`] when the package already
    /// has a module.
    pub fn with_module(mut self, module: PackageModule) -> Result<Self, RegistryError> {
        if self.modules.contains_key(module.package()) {
            return Err(RegistryError::DuplicatePackage {
                package: module.package,
            });
        }
        self.modules
            .insert(module.package().to_owned(), Arc::new(module));
        Ok(self)
    }

    /// Module for `package`.
    #[must_use]
    pub fn module(&self, package: &str) -> Option<Arc<PackageModule>> {
        self.modules.get(package).cloned()
    }

    /// Registered package names, sorted.
    #[must_use]
    pub fn packages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }
}
