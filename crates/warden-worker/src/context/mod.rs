//! Per-package execution contexts.
//!
//! A context binds a package name to its registered module and to the
//! package's own mutable state. Every context chains to the worker's
//! built-in context, so lookups fall back to the calls the worker itself
//! ships. Contexts are created on first use and cached for the worker's
//! lifetime.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use warden_core::{CallDescriptor, RemoteException, kinds};

use crate::builtin;
use crate::registry::{CallSpec, ModuleRegistry, PackageModule};
use crate::sync::lock;

const CONTEXT_TARGET: &str = "warden_worker::context";

/// Execution context of one package.
pub struct PackageContext {
    package: String,
    module: Arc<PackageModule>,
    parent: Option<Arc<PackageContext>>,
    statics: Mutex<HashMap<TypeId, Box<dyn Any + Send>>>,
}

impl PackageContext {
    fn new(module: Arc<PackageModule>, parent: Option<Arc<Self>>) -> Self {
        Self {
            package: module.package().to_owned(),
            module,
            parent,
            statics: Mutex::new(HashMap::new()),
        }
    }

    /// Package the context serves.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Finds a call in this context or, failing that, its parent.
    #[must_use]
    pub fn lookup(&self, descriptor: &CallDescriptor, best_match: bool) -> Option<&CallSpec> {
        self.module.lookup(descriptor, best_match).or_else(|| {
            self.parent
                .as_deref()
                .and_then(|parent| parent.lookup(descriptor, best_match))
        })
    }

    /// Runs `f` against the package's state of type `S`, creating it with
    /// `S::default()` on first use.
    pub fn with_state<S, R>(&self, f: impl FnOnce(&mut S) -> R) -> R
    where
        S: Default + Send + 'static,
    {
        let mut statics = lock(&self.statics);
        let key = TypeId::of::<S>();
        let mut state: Box<S> = statics
            .remove(&key)
            .and_then(|boxed| boxed.downcast::<S>().ok())
            .unwrap_or_default();
        let result = f(&mut state);
        statics.insert(key, state);
        result
    }
}

impl std::fmt::Debug for PackageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageContext")
            .field("package", &self.package)
            .field("parent", &self.parent.as_ref().map(|parent| parent.package()))
            .finish_non_exhaustive()
    }
}

/// Lazily populated map of package contexts.
#[derive(Debug)]
pub struct ContextCache {
    registry: Arc<ModuleRegistry>,
    contexts: Mutex<HashMap<String, Arc<PackageContext>>>,
}

impl ContextCache {
    /// Creates an empty cache over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the context for `package`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns a no-such-package exception when no module serves `package`.
    pub fn context(&self, package: &str) -> Result<Arc<PackageContext>, RemoteException> {
        let mut contexts = lock(&self.contexts);
        Self::context_locked(&self.registry, &mut contexts, package)
    }

    fn context_locked(
        registry: &ModuleRegistry,
        contexts: &mut HashMap<String, Arc<PackageContext>>,
        package: &str,
    ) -> Result<Arc<PackageContext>, RemoteException> {
        if let Some(found) = contexts.get(package) {
            return Ok(Arc::clone(found));
        }
        let module = registry.module(package).ok_or_else(|| {
            RemoteException::new(
                kinds::NO_SUCH_PACKAGE,
                format!("no module is registered for package '{package}'"),
            )
        })?;
        let parent = if package == builtin::PACKAGE {
            None
        } else {
            Self::context_locked(registry, contexts, builtin::PACKAGE).ok()
        };
        let context = Arc::new(PackageContext::new(module, parent));
        contexts.insert(package.to_owned(), Arc::clone(&context));
        debug!(target: CONTEXT_TARGET, package, "package context created");
        Ok(context)
    }

    /// Packages with a materialised context, sorted.
    #[must_use]
    pub fn packages(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.contexts).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests;
