//! Control request dispatch.
//!
//! [`Worker`] owns everything a worker process holds: the package contexts,
//! the handle table, the resolution table, and the lifecycle state. The
//! stdio server feeds it one [`ControlRequest`] at a time and writes back
//! the [`ControlResponse`]. No request ever breaks the channel: failures
//! come back as [`ControlResponse::Failed`] or as a failed call result.
//!
//! Binding starts a background preload queue that resolves the warm-up call
//! and materialises the requested package contexts before the worker
//! reports [`WorkerState::Ready`].

mod memory;
mod preload;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use warden_core::protocol::{
    BindExtras, ControlRequest, ControlResponse, GcReport, PROTOCOL_VERSION, ResolvedId,
    WorkerState,
};
use warden_core::{
    CallDescriptor, CallFlags, CallParam, HandleId, RemoteException, TaintSet, kinds,
};

use crate::builtin;
use crate::capability::{CalloutPort, Capability};
use crate::context::ContextCache;
use crate::handle::HandleTable;
use crate::object::ObjectIds;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::resolved::{CallEnv, ResolvedCall};
use crate::sync::lock;

use self::preload::Preloader;

const DISPATCH_TARGET: &str = "warden_worker::dispatch";

#[derive(Debug, Default)]
struct ResolutionTable {
    next: u64,
    by_id: HashMap<ResolvedId, Arc<ResolvedCall>>,
    by_key: HashMap<(CallDescriptor, bool), ResolvedId>,
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    grants: Vec<Capability>,
    sandbox_id: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    contexts: ContextCache,
    handles: HandleTable,
    ids: ObjectIds,
    resolutions: Mutex<ResolutionTable>,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    fn state(&self) -> WorkerState {
        lock(&self.lifecycle).state
    }

    fn transition(&self, from: &[WorkerState], to: WorkerState) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        if !from.contains(&lifecycle.state) {
            return false;
        }
        lifecycle.state = to;
        info!(
            target: DISPATCH_TARGET,
            event = "state",
            state = %to,
            sandbox = lifecycle.sandbox_id,
            "worker state changed"
        );
        true
    }

    fn resolve(
        &self,
        descriptor: &CallDescriptor,
        best_match: bool,
    ) -> Result<Arc<ResolvedCall>, RemoteException> {
        let mut table = lock(&self.resolutions);
        let key = (descriptor.clone(), best_match);
        if let Some(existing) = table.by_key.get(&key).and_then(|id| table.by_id.get(id)) {
            return Ok(Arc::clone(existing));
        }
        let context = self.contexts.context(descriptor.component().package())?;
        let spec = context
            .lookup(descriptor, best_match)
            .cloned()
            .ok_or_else(|| RemoteException::no_such_method(descriptor))?;
        table.next = table.next.saturating_add(1);
        let id = ResolvedId::new(table.next);
        let resolved = Arc::new(ResolvedCall::new(id, spec, context));
        table.by_id.insert(id, Arc::clone(&resolved));
        table.by_key.insert(key, id);
        debug!(target: DISPATCH_TARGET, descriptor = %descriptor, resolved = %id, "call resolved");
        Ok(resolved)
    }

    fn collect_resolutions(&self) -> usize {
        let mut table = lock(&self.resolutions);
        let before = table.by_id.len();
        table
            .by_id
            .retain(|_, resolved| Arc::strong_count(resolved) > 1);
        let ResolutionTable { by_id, by_key, .. } = &mut *table;
        by_key.retain(|_, id| by_id.contains_key(id));
        before.saturating_sub(by_id.len())
    }

    fn preload(&self, packages: &[String]) {
        let warmed = builtin::noop_descriptor()
            .map_err(|error| RemoteException::protocol(error.to_string()))
            .and_then(|noop| self.resolve(&noop, false));
        match warmed {
            Ok(_) => debug!(target: DISPATCH_TARGET, "warm-up call resolved"),
            Err(error) => warn!(target: DISPATCH_TARGET, error = %error, "warm-up resolution failed"),
        }
        for package in packages {
            if let Err(error) = self.contexts.context(package) {
                warn!(target: DISPATCH_TARGET, package = %package, error = %error, "preload skipped");
            }
        }
        self.transition(&[WorkerState::Preloading], WorkerState::Ready);
    }
}

/// Request dispatcher for one worker process.
#[derive(Debug)]
pub struct Worker {
    shared: Arc<Shared>,
    preloader: Mutex<Option<Preloader>>,
}

impl Worker {
    /// Creates an unbound worker serving the calls in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                contexts: ContextCache::new(registry),
                handles: HandleTable::new(),
                ids: ObjectIds::new(),
                resolutions: Mutex::new(ResolutionTable::default()),
                lifecycle: Mutex::new(Lifecycle {
                    state: WorkerState::Unbound,
                    grants: Vec::new(),
                    sandbox_id: None,
                }),
            }),
            preloader: Mutex::new(None),
        }
    }

    /// Creates an unbound worker serving only the built-in calls.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the built-in module is inconsistent.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        ModuleRegistry::with_builtins().map(|registry| Self::new(Arc::new(registry)))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Whether the worker stopped serving.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    /// Handles one control request.
    pub fn handle(&self, request: ControlRequest, port: &mut dyn CalloutPort) -> ControlResponse {
        let name = request.name();
        debug!(target: DISPATCH_TARGET, request = name, "handling request");
        let outcome = match request {
            ControlRequest::Bind { extras } => self.bind(extras),
            ControlRequest::Status => Ok(ControlResponse::Status {
                state: self.state(),
                preloaded: self.shared.contexts.packages(),
            }),
            ControlRequest::Resolve {
                descriptor,
                best_match,
                want_details,
            } => self.require_bound().map(|()| {
                match self.shared.resolve(&descriptor, best_match) {
                    Ok(resolved) => ControlResponse::Resolved {
                        resolved: resolved.id(),
                        details: want_details.then(|| resolved.details()),
                    },
                    Err(exception) => {
                        debug!(
                            target: DISPATCH_TARGET,
                            descriptor = %descriptor,
                            error = %exception,
                            "resolution failed"
                        );
                        ControlResponse::ResolveFailed { exception }
                    }
                }
            }),
            ControlRequest::Call {
                resolved,
                flags,
                params,
                taint,
            } => self.call(resolved, flags, params, &taint, port),
            ControlRequest::MarshalOut { handle, release } => self.marshal_out(handle, release),
            ControlRequest::Destroy { handle } => {
                self.shared.handles.destroy(handle);
                Ok(ControlResponse::Destroyed)
            }
            ControlRequest::Pid => Ok(ControlResponse::Pid {
                pid: std::process::id(),
            }),
            ControlRequest::Uid => Ok(ControlResponse::Uid {
                uid: nix::unistd::getuid().as_raw(),
            }),
            ControlRequest::DumpMemoryInfo => memory::read()
                .map(|info| ControlResponse::MemoryInfo { info })
                .map_err(|error| {
                    RemoteException::new(kinds::IO, format!("memory report unavailable: {error}"))
                }),
            ControlRequest::ForceGc => Ok(self.force_gc()),
            ControlRequest::Kill => Ok(self.kill()),
        };
        outcome.unwrap_or_else(|exception| {
            debug!(target: DISPATCH_TARGET, request = name, error = %exception, "request failed");
            ControlResponse::Failed { exception }
        })
    }

    fn bind(&self, extras: BindExtras) -> Result<ControlResponse, RemoteException> {
        if extras.root_service.protocol_version != PROTOCOL_VERSION {
            return Err(RemoteException::protocol(format!(
                "host speaks protocol {}, worker speaks {PROTOCOL_VERSION}",
                extras.root_service.protocol_version
            )));
        }
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if lifecycle.state != WorkerState::Unbound {
                return Err(RemoteException::protocol("worker is already bound"));
            }
            lifecycle.grants = Capability::parse_grants(&extras.trusted_api);
            lifecycle.sandbox_id = Some(extras.sandbox_id);
            lifecycle.state = WorkerState::Bound;
            info!(
                target: DISPATCH_TARGET,
                event = "bound",
                sandbox = extras.sandbox_id,
                host_pid = extras.root_service.host_pid,
                "worker bound"
            );
        }
        self.shared
            .transition(&[WorkerState::Bound], WorkerState::Preloading);
        let shared = Arc::clone(&self.shared);
        let packages = extras.preload_packages;
        let task: Box<dyn FnOnce() + Send> = Box::new(move || shared.preload(&packages));
        let mut preloader = lock(&self.preloader);
        let queued = match Preloader::spawn() {
            Ok(spawned) => {
                let submitted = spawned.submit(task);
                *preloader = Some(spawned);
                submitted
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, error = %error, "preload thread unavailable; preloading inline");
                Err(task)
            }
        };
        if let Err(task) = queued {
            task();
        }
        Ok(ControlResponse::Bound)
    }

    fn require_bound(&self) -> Result<(), RemoteException> {
        match self.state() {
            WorkerState::Unbound => Err(RemoteException::protocol("worker is not bound")),
            WorkerState::Terminated => Err(RemoteException::new(
                kinds::DEAD_OBJECT,
                "worker has terminated",
            )),
            WorkerState::Bound | WorkerState::Preloading | WorkerState::Ready => Ok(()),
        }
    }

    fn call(
        &self,
        resolved: ResolvedId,
        flags: CallFlags,
        params: Vec<CallParam>,
        taint: &TaintSet,
        port: &mut dyn CalloutPort,
    ) -> Result<ControlResponse, RemoteException> {
        self.require_bound()?;
        let call = lock(&self.shared.resolutions)
            .by_id
            .get(&resolved)
            .cloned()
            .ok_or_else(|| RemoteException::protocol(format!("unknown resolved call {resolved}")))?;
        let grants = lock(&self.shared.lifecycle).grants.clone();
        let env = CallEnv {
            handles: &self.shared.handles,
            ids: &self.shared.ids,
            grants: &grants,
            port,
        };
        let result = call.execute(env, flags, params, taint);
        Ok(ControlResponse::CallCompleted { result })
    }

    fn marshal_out(&self, id: HandleId, release: bool) -> Result<ControlResponse, RemoteException> {
        let handle = self.shared.handles.get(id)?;
        let payload = handle.with_value(|object| {
            object
                .encode()
                .map_err(|error| RemoteException::illegal_argument(error.to_string()))
        })?;
        if release {
            self.shared.handles.destroy(id);
        }
        Ok(ControlResponse::Marshaled {
            payload: Some(payload),
        })
    }

    fn force_gc(&self) -> ControlResponse {
        let report = GcReport {
            handles_swept: self.shared.handles.sweep(),
            resolutions_dropped: self.shared.collect_resolutions(),
        };
        info!(
            target: DISPATCH_TARGET,
            handles_swept = report.handles_swept,
            resolutions_dropped = report.resolutions_dropped,
            "forced collection"
        );
        ControlResponse::Collected { report }
    }

    fn kill(&self) -> ControlResponse {
        self.shared.transition(
            &[
                WorkerState::Unbound,
                WorkerState::Bound,
                WorkerState::Preloading,
                WorkerState::Ready,
            ],
            WorkerState::Terminated,
        );
        if let Some(preloader) = lock(&self.preloader).take() {
            preloader.shutdown();
        }
        ControlResponse::Killed
    }
}
