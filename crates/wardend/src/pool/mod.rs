//! The fixed pool of sandbox workers.
//!
//! Each slot owns at most one worker, started lazily on first use and
//! bound with every trusted capability. A slot accumulates the taint of
//! every call it runs. Calls without an explicit sandbox or a handle
//! argument go to an idle slot whose taint is already covered by the call's
//! inbound taint; when none is idle the least tainted idle slot is recycled
//! so that unrelated data never meets in one worker.
//!
//! A slot's lock is held for the whole of a call, callouts included. Work
//! that needs another slot, such as marshaling a foreign handle, happens
//! before the target is locked, and event deliveries run after the firing
//! call has released its slot.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, info, warn};
use warden_config::Config;
use warden_core::protocol::{
    BindExtras, CallDetails, ControlRequest, ControlResponse, GcReport, MemoryInfo,
    PROTOCOL_VERSION, ResolvedId, RootService, WorkerState,
};
use warden_core::{
    CallDescriptor, CallFlags, CallParam, CallResult, ComponentName, NUM_SANDBOXES, ParamFlags,
    ParceledPayload, RemoteException, TaintSet, WireValue,
};
use warden_worker::Capability;

use crate::call::{HostCall, HostResult, PendingCall};
use crate::channel::{ChannelError, WorkerLauncher};
use crate::connection::{CalloutHandler, RefuseCallouts, WorkerConnection};
use crate::error::HostError;
use crate::handle::{ArgValue, HostArg, HostHandle};
use crate::health::{HealthReporter, SandboxEvent};
use crate::services::{CallScope, ServiceSession, TrustedServices};
use crate::sync::{lock, try_lock};

const POOL_TARGET: &str = "wardend::pool";
const READY_POLL: Duration = Duration::from_millis(10);
const BUSY_BACKOFF: Duration = Duration::from_millis(1);
const RESOLUTION_CACHE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(255);

/// Pool sizing and worker timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pool_size: usize,
    preload_packages: Vec<String>,
    kill_grace: Duration,
    ready_timeout: Duration,
}

impl PoolSettings {
    /// Settings for `pool_size` slots with short timeouts.
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.clamp(1, NUM_SANDBOXES),
            preload_packages: Vec::new(),
            kill_grace: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// Settings taken from the daemon configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool_size: config.pool_size(),
            preload_packages: config.preload_packages().to_vec(),
            kill_grace: config.kill_grace_period(),
            ready_timeout: config.ready_timeout(),
        }
    }

    /// Replaces the packages every worker preloads.
    #[must_use]
    pub fn with_preload_packages(mut self, packages: Vec<String>) -> Self {
        self.preload_packages = packages;
        self
    }

    /// Replaces the time a worker gets to report ready.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Number of slots.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }
}

struct Slot {
    index: usize,
    generation: u64,
    worker: Option<WorkerConnection>,
    taint: TaintSet,
    resolutions: LruCache<(CallDescriptor, bool), ResolvedId>,
}

impl Slot {
    fn new(index: usize) -> Self {
        Self {
            index,
            generation: 0,
            worker: None,
            taint: TaintSet::empty(),
            resolutions: LruCache::new(RESOLUTION_CACHE),
        }
    }

    /// Forgets the worker and everything tied to it.
    fn reset(&mut self) -> Option<WorkerConnection> {
        self.generation = self.generation.wrapping_add(1);
        self.taint = TaintSet::empty();
        self.resolutions.clear();
        self.worker.take()
    }
}

struct Inner {
    settings: PoolSettings,
    launcher: Arc<dyn WorkerLauncher>,
    services: TrustedServices,
    reporter: Arc<dyn HealthReporter>,
    slots: Vec<Mutex<Slot>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

/// Argument after foreign handles were brought into the target sandbox.
enum LocalArg {
    Null(ParamFlags),
    Data(CallParam),
    Handle(HostHandle, ParamFlags),
}

/// Shared handle to the sandbox pool.
#[derive(Clone)]
pub struct SandboxManager {
    inner: Arc<Inner>,
}

impl SandboxManager {
    /// Creates a pool; no worker starts until a slot is used.
    #[must_use]
    pub fn new(
        settings: PoolSettings,
        launcher: Arc<dyn WorkerLauncher>,
        services: TrustedServices,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        let slots = (0..settings.pool_size).map(|index| Mutex::new(Slot::new(index))).collect();
        Self {
            inner: Arc::new(Inner {
                settings,
                launcher,
                services,
                reporter,
                slots,
                deliveries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.inner.slots.len()
    }

    /// The trusted API shared by every sandbox.
    #[must_use]
    pub fn services(&self) -> &TrustedServices {
        &self.inner.services
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Runs `call`, blocking the caller only when the call is synchronous.
    #[must_use]
    pub fn submit(&self, call: HostCall) -> PendingCall {
        if !call.call_flags().is_async() {
            return PendingCall::Ready(self.call(call));
        }
        let (sender, receiver) = mpsc::channel();
        let manager = self.clone();
        let spawned = thread::Builder::new()
            .name(String::from("warden-call"))
            .spawn(move || {
                if sender.send(manager.call(call)).is_err() {
                    debug!(target: POOL_TARGET, "asynchronous result discarded");
                }
            });
        match spawned {
            Ok(_) => PendingCall::Waiting(receiver),
            Err(error) => {
                warn!(target: POOL_TARGET, %error, "failed to start call thread");
                PendingCall::Ready(Err(HostError::Abandoned))
            }
        }
    }

    /// Runs `call` to completion on the calling thread.
    ///
    /// Failures raised by sandboxed code come back inside the
    /// [`HostResult`]; only host-side failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when no worker could serve the call, a handle
    /// argument is stale, or a control channel broke.
    pub fn call(&self, call: HostCall) -> Result<HostResult, HostError> {
        let result = self.run(call);
        self.dispatch_deliveries();
        result
    }

    fn run(&self, call: HostCall) -> Result<HostResult, HostError> {
        let inbound = call.inbound_taint();
        let best_match = call.allows_best_match();
        let (descriptor, flags, args) = call.into_parts();
        let fixed = flags
            .sandbox_override(self.pool_size())
            .or_else(|| args.iter().find_map(HostArg::as_handle).map(HostHandle::sandbox));
        let (mut slot, local) = match fixed {
            Some(index) => {
                let local = self.localise(index, args)?;
                (lock(self.slot(index)?), local)
            }
            None => {
                let local = self.localise(usize::MAX, args)?;
                (self.acquire_idle(&inbound), local)
            }
        };
        debug!(
            target: POOL_TARGET,
            sandbox = slot.index,
            %descriptor,
            taint = %inbound,
            "dispatching call"
        );
        self.execute(&mut slot, &descriptor, flags, best_match, local, &inbound)
    }

    /// Marshals handles that live outside `target` into plain data.
    fn localise(&self, target: usize, args: Vec<HostArg>) -> Result<Vec<LocalArg>, HostError> {
        args.into_iter()
            .map(|arg| {
                let (value, flags) = arg.into_parts();
                match value {
                    ArgValue::Null => Ok(LocalArg::Null(flags)),
                    ArgValue::Data(param) => Ok(LocalArg::Data(param.with_flags(flags))),
                    ArgValue::Handle(handle) if handle.sandbox() == target => {
                        Ok(LocalArg::Handle(handle, flags))
                    }
                    ArgValue::Handle(handle) => self.import(&handle, flags),
                }
            })
            .collect()
    }

    fn import(&self, handle: &HostHandle, flags: ParamFlags) -> Result<LocalArg, HostError> {
        let passed = flags.difference(ParamFlags::HANDLE_RELEASE | ParamFlags::HANDLE_SYNC_ONLY);
        if flags.contains(ParamFlags::HANDLE_SYNC_ONLY) {
            warn!(target: POOL_TARGET, %handle, "skipping sync-only handle from another sandbox");
            return Ok(LocalArg::Null(passed));
        }
        let payload = self.marshal_out(handle, flags.contains(ParamFlags::HANDLE_RELEASE))?;
        Ok(payload.map_or(LocalArg::Null(passed), |data| {
            LocalArg::Data(CallParam::data(data).with_flags(passed))
        }))
    }

    /// Picks an idle slot for a call carrying `inbound` taint.
    fn acquire_idle(&self, inbound: &TaintSet) -> MutexGuard<'_, Slot> {
        loop {
            let mut idle: Vec<MutexGuard<'_, Slot>> =
                self.inner.slots.iter().filter_map(try_lock).collect();
            let covered = |slot: &MutexGuard<'_, Slot>| slot.taint.is_subset_of(inbound);
            let chosen = idle
                .iter()
                .position(|slot| slot.worker.is_some() && covered(slot))
                .or_else(|| idle.iter().position(covered));
            if let Some(position) = chosen {
                return idle.swap_remove(position);
            }
            let least_tainted = idle
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.taint.len())
                .map(|(position, _)| position);
            if let Some(position) = least_tainted {
                let mut slot = idle.swap_remove(position);
                drop(idle);
                self.recycle(&mut slot);
                return slot;
            }
            drop(idle);
            thread::sleep(BUSY_BACKOFF);
        }
    }

    fn execute(
        &self,
        slot: &mut Slot,
        descriptor: &CallDescriptor,
        flags: CallFlags,
        best_match: bool,
        args: Vec<LocalArg>,
        inbound: &TaintSet,
    ) -> Result<HostResult, HostError> {
        self.ensure_started(slot)?;
        let params = args
            .into_iter()
            .map(|arg| local_param(slot, arg))
            .collect::<Result<Vec<_>, _>>()?;
        let resolved = match self.resolve_cached(slot, descriptor, best_match)? {
            Ok(resolved) => resolved,
            Err(exception) => return Ok(HostResult::failed(slot.index, exception)),
        };

        let mut scope = CallScope::new(
            slot.index,
            descriptor.component().package(),
            slot.taint.merge(inbound),
        );
        let request = ControlRequest::Call {
            resolved,
            flags,
            params,
            taint: scope.taint().clone(),
        };
        let response = {
            let mut session = ServiceSession::new(&self.inner.services, &mut scope);
            self.send(slot, request, &mut session)?
        };
        slot.taint = scope.into_taint();
        match response {
            ControlResponse::CallCompleted { result } => Ok(wrap_result(slot, result)),
            ControlResponse::Failed { exception } => Ok(HostResult::failed(slot.index, exception)),
            _ => Err(HostError::UnexpectedResponse {
                index: slot.index,
                request: "call",
            }),
        }
    }

    fn resolve_cached(
        &self,
        slot: &mut Slot,
        descriptor: &CallDescriptor,
        best_match: bool,
    ) -> Result<Result<ResolvedId, RemoteException>, HostError> {
        let key = (descriptor.clone(), best_match);
        if let Some(resolved) = slot.resolutions.get(&key) {
            return Ok(Ok(*resolved));
        }
        let request = ControlRequest::Resolve {
            descriptor: descriptor.clone(),
            best_match,
            want_details: false,
        };
        match self.send(slot, request, &mut RefuseCallouts)? {
            ControlResponse::Resolved { resolved, .. } => {
                slot.resolutions.put(key, resolved);
                Ok(Ok(resolved))
            }
            ControlResponse::ResolveFailed { exception } | ControlResponse::Failed { exception } => {
                debug!(target: POOL_TARGET, sandbox = slot.index, %descriptor, %exception, "resolution failed");
                Ok(Err(exception))
            }
            _ => Err(HostError::UnexpectedResponse {
                index: slot.index,
                request: "resolve",
            }),
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Fires an event from the host and starts its deliveries.
    ///
    /// Returns the number of subscribers reached.
    pub fn fire_event(
        &self,
        taint: &TaintSet,
        channel: &ComponentName,
        args: Vec<ParceledPayload>,
    ) -> usize {
        let queued = self.inner.services.events().fire_event(taint, channel, args);
        self.dispatch_deliveries();
        queued
    }

    /// Waits for every event delivery started so far, including deliveries
    /// triggered by other deliveries.
    pub fn flush_deliveries(&self) {
        loop {
            let running: Vec<JoinHandle<()>> = lock(&self.inner.deliveries).drain(..).collect();
            if running.is_empty() {
                return;
            }
            for delivery in running {
                if delivery.join().is_err() {
                    warn!(target: POOL_TARGET, "event delivery panicked");
                }
            }
        }
    }

    fn dispatch_deliveries(&self) {
        for delivery in self.inner.services.events().take_pending() {
            let call = delivery
                .args()
                .iter()
                .cloned()
                .fold(HostCall::new(delivery.subscriber().clone()), |call, payload| {
                    call.arg(HostArg::payload(payload))
                })
                .taint(delivery.taint())
                .flags(CallFlags::ASYNC | CallFlags::NO_RETURN_VALUE);
            let manager = self.clone();
            let channel = delivery.channel().clone();
            let spawned = thread::Builder::new()
                .name(String::from("warden-delivery"))
                .spawn(move || match manager.call(call) {
                    Ok(result) => {
                        if let Some(exception) = result.throwable() {
                            warn!(target: POOL_TARGET, %channel, %exception, "subscriber failed");
                        }
                    }
                    Err(error) => {
                        warn!(target: POOL_TARGET, %channel, %error, "event delivery failed");
                    }
                });
            match spawned {
                Ok(handle) => lock(&self.inner.deliveries).push(handle),
                Err(error) => warn!(target: POOL_TARGET, %error, "failed to start event delivery"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    /// Encodes the value behind `handle`, destroying it when `release` is
    /// set. Null handles give `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::StaleHandle`] when the producing worker has
    /// restarted, or [`HostError::Rejected`] when the worker refused.
    pub fn marshal_out(
        &self,
        handle: &HostHandle,
        release: bool,
    ) -> Result<Option<ParceledPayload>, HostError> {
        let request = ControlRequest::MarshalOut {
            handle: handle.id(),
            release,
        };
        match self.handle_request(handle, request)? {
            ControlResponse::Marshaled { payload } => Ok(payload),
            _ => Err(HostError::UnexpectedResponse {
                index: handle.sandbox(),
                request: "marshal_out",
            }),
        }
    }

    /// Decodes the value behind `handle` without releasing it.
    ///
    /// # Errors
    ///
    /// As for [`SandboxManager::marshal_out`], plus [`HostError::Encode`]
    /// when the value is not a `T`.
    pub fn read<T: WireValue>(&self, handle: &HostHandle) -> Result<Option<T>, HostError> {
        self.marshal_out(handle, false)?
            .map(|payload| payload.decode::<T>())
            .transpose()
            .map_err(HostError::from)
    }

    /// Destroys `handle` inside its sandbox.
    ///
    /// # Errors
    ///
    /// As for [`SandboxManager::marshal_out`].
    pub fn release(&self, handle: &HostHandle) -> Result<(), HostError> {
        match self.handle_request(handle, ControlRequest::Destroy { handle: handle.id() })? {
            ControlResponse::Destroyed => Ok(()),
            _ => Err(HostError::UnexpectedResponse {
                index: handle.sandbox(),
                request: "destroy",
            }),
        }
    }

    fn handle_request(
        &self,
        handle: &HostHandle,
        request: ControlRequest,
    ) -> Result<ControlResponse, HostError> {
        let mut slot = lock(self.slot(handle.sandbox())?);
        if slot.generation != handle.generation() || slot.worker.is_none() {
            return Err(HostError::StaleHandle {
                handle: handle.id(),
            });
        }
        let name = request.name();
        let response = self.send(&mut slot, request, &mut RefuseCallouts)?;
        rejected(slot.index, name, response)
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Resolves `descriptor` in sandbox `index`, starting it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Rejected`] carrying the resolution failure, or
    /// any failure to start the worker.
    pub fn resolve(
        &self,
        index: usize,
        descriptor: &CallDescriptor,
        best_match: bool,
        want_details: bool,
    ) -> Result<Option<CallDetails>, HostError> {
        let request = ControlRequest::Resolve {
            descriptor: descriptor.clone(),
            best_match,
            want_details,
        };
        let mut slot = lock(self.slot(index)?);
        self.ensure_started(&mut slot)?;
        match self.send(&mut slot, request, &mut RefuseCallouts)? {
            ControlResponse::Resolved { resolved, details } => {
                slot.resolutions.put((descriptor.clone(), best_match), resolved);
                Ok(details)
            }
            ControlResponse::ResolveFailed { exception } | ControlResponse::Failed { exception } => {
                Err(HostError::Rejected {
                    index,
                    request: "resolve",
                    exception,
                })
            }
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "resolve",
            }),
        }
    }

    /// Process id of the worker in `index`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the worker cannot be started or reached.
    pub fn pid(&self, index: usize) -> Result<u32, HostError> {
        match self.control(index, ControlRequest::Pid)? {
            ControlResponse::Pid { pid } => Ok(pid),
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "pid",
            }),
        }
    }

    /// User id of the worker in `index`.
    ///
    /// # Errors
    ///
    /// As for [`SandboxManager::pid`].
    pub fn uid(&self, index: usize) -> Result<u32, HostError> {
        match self.control(index, ControlRequest::Uid)? {
            ControlResponse::Uid { uid } => Ok(uid),
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "uid",
            }),
        }
    }

    /// Memory report of the worker in `index`.
    ///
    /// # Errors
    ///
    /// As for [`SandboxManager::pid`].
    pub fn memory_info(&self, index: usize) -> Result<MemoryInfo, HostError> {
        match self.control(index, ControlRequest::DumpMemoryInfo)? {
            ControlResponse::MemoryInfo { info } => Ok(info),
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "dump_memory_info",
            }),
        }
    }

    /// Sweeps the worker in `index` and forgets its cached resolutions.
    ///
    /// # Errors
    ///
    /// As for [`SandboxManager::pid`].
    pub fn force_gc(&self, index: usize) -> Result<GcReport, HostError> {
        let mut slot = lock(self.slot(index)?);
        self.ensure_started(&mut slot)?;
        let response = self.send(&mut slot, ControlRequest::ForceGc, &mut RefuseCallouts)?;
        match rejected(index, "force_gc", response)? {
            ControlResponse::Collected { report } => {
                slot.resolutions.clear();
                Ok(report)
            }
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "force_gc",
            }),
        }
    }

    /// Lifecycle state of the worker in `index`; unstarted slots report
    /// [`WorkerState::Unbound`] without starting a worker.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the worker cannot be reached.
    pub fn status(&self, index: usize) -> Result<WorkerState, HostError> {
        let mut slot = lock(self.slot(index)?);
        if slot.worker.is_none() {
            return Ok(WorkerState::Unbound);
        }
        match self.send(&mut slot, ControlRequest::Status, &mut RefuseCallouts)? {
            ControlResponse::Status { state, .. } => Ok(state),
            _ => Err(HostError::UnexpectedResponse {
                index,
                request: "status",
            }),
        }
    }

    /// Taint accumulated by sandbox `index`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NoSuchSandbox`] for an index outside the pool.
    pub fn sandbox_taint(&self, index: usize) -> Result<TaintSet, HostError> {
        Ok(lock(self.slot(index)?).taint.clone())
    }

    /// Stops the worker in `index`: a kill request, then a graceful stop
    /// bounded by the grace period, then a forced one. Handles produced by
    /// the worker become stale.
    ///
    /// Returns whether a worker was running.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NoSuchSandbox`] for an index outside the pool.
    pub fn kill(&self, index: usize) -> Result<bool, HostError> {
        let mut slot = lock(self.slot(index)?);
        let Some(worker) = slot.reset() else {
            return Ok(false);
        };
        self.stop(worker, true);
        self.inner.reporter.sandbox_event(index, SandboxEvent::Killed);
        Ok(true)
    }

    /// Waits for deliveries, then stops every worker.
    pub fn shutdown(&self) {
        self.flush_deliveries();
        for index in 0..self.pool_size() {
            match self.kill(index) {
                Ok(true) => info!(target: POOL_TARGET, sandbox = index, "sandbox stopped"),
                Ok(false) => {}
                Err(error) => warn!(target: POOL_TARGET, sandbox = index, %error, "failed to stop sandbox"),
            }
        }
    }

    fn control(&self, index: usize, request: ControlRequest) -> Result<ControlResponse, HostError> {
        let mut slot = lock(self.slot(index)?);
        self.ensure_started(&mut slot)?;
        let name = request.name();
        let response = self.send(&mut slot, request, &mut RefuseCallouts)?;
        rejected(index, name, response)
    }

    // ------------------------------------------------------------------
    // Worker lifecycle
    // ------------------------------------------------------------------

    fn slot(&self, index: usize) -> Result<&Mutex<Slot>, HostError> {
        self.inner
            .slots
            .get(index)
            .ok_or_else(|| HostError::NoSuchSandbox {
                index,
                pool_size: self.pool_size(),
            })
    }

    fn ensure_started(&self, slot: &mut Slot) -> Result<(), HostError> {
        if slot.worker.is_some() {
            return Ok(());
        }
        let index = slot.index;
        self.inner.reporter.sandbox_event(index, SandboxEvent::Launching);
        let started = self
            .inner
            .launcher
            .launch(index)
            .map_err(|source| HostError::Launch { index, source })
            .and_then(|channel| {
                let mut worker = WorkerConnection::new(index, channel);
                match self.bind(&mut worker) {
                    Ok(()) => Ok(worker),
                    Err(error) => {
                        self.stop(worker, false);
                        Err(error)
                    }
                }
            });
        match started {
            Ok(worker) => {
                slot.worker = Some(worker);
                Ok(())
            }
            Err(error) => {
                self.inner.reporter.sandbox_failed(index, &error);
                Err(error)
            }
        }
    }

    fn bind(&self, worker: &mut WorkerConnection) -> Result<(), HostError> {
        let index = worker.index();
        let extras = BindExtras {
            sandbox_id: index,
            trusted_api: Capability::ALL.iter().map(ToString::to_string).collect(),
            root_service: RootService {
                host_pid: std::process::id(),
                protocol_version: PROTOCOL_VERSION,
            },
            preload_packages: self.inner.settings.preload_packages.clone(),
        };
        let channel_failed = |source: ChannelError| HostError::Channel { index, source };
        let response = worker
            .request(ControlRequest::Bind { extras }, &mut RefuseCallouts)
            .map_err(channel_failed)?;
        if !matches!(rejected(index, "bind", response)?, ControlResponse::Bound) {
            return Err(HostError::UnexpectedResponse {
                index,
                request: "bind",
            });
        }
        self.inner.reporter.sandbox_event(index, SandboxEvent::Bound);

        let timeout = self.inner.settings.ready_timeout;
        let started = Instant::now();
        loop {
            let response = worker
                .request(ControlRequest::Status, &mut RefuseCallouts)
                .map_err(channel_failed)?;
            match rejected(index, "status", response)? {
                ControlResponse::Status {
                    state: WorkerState::Ready,
                    preloaded,
                } => {
                    debug!(target: POOL_TARGET, sandbox = index, ?preloaded, "worker ready");
                    self.inner.reporter.sandbox_event(index, SandboxEvent::Ready);
                    return Ok(());
                }
                ControlResponse::Status {
                    state: WorkerState::Terminated,
                    ..
                } => {
                    return Err(HostError::Channel {
                        index,
                        source: ChannelError::Closed,
                    });
                }
                ControlResponse::Status { .. } => {}
                _ => {
                    return Err(HostError::UnexpectedResponse {
                        index,
                        request: "status",
                    });
                }
            }
            if started.elapsed() >= timeout {
                return Err(HostError::NotReady { index, timeout });
            }
            thread::sleep(READY_POLL);
        }
    }

    fn recycle(&self, slot: &mut Slot) {
        let shed = slot.taint.clone();
        if let Some(worker) = slot.reset() {
            self.stop(worker, true);
        }
        info!(target: POOL_TARGET, sandbox = slot.index, taint = %shed, "recycled sandbox");
        self.inner
            .reporter
            .sandbox_event(slot.index, SandboxEvent::Recycled);
    }

    fn stop(&self, mut worker: WorkerConnection, graceful: bool) {
        let index = worker.index();
        if graceful
            && let Err(error) = worker.request(ControlRequest::Kill, &mut RefuseCallouts)
        {
            debug!(target: POOL_TARGET, sandbox = index, %error, "kill request failed");
        }
        let grace = if graceful {
            self.inner.settings.kill_grace
        } else {
            Duration::ZERO
        };
        if let Err(error) = worker.shutdown(grace) {
            warn!(target: POOL_TARGET, sandbox = index, %error, "worker did not stop cleanly");
        }
    }

    fn send(
        &self,
        slot: &mut Slot,
        request: ControlRequest,
        callouts: &mut dyn CalloutHandler,
    ) -> Result<ControlResponse, HostError> {
        let index = slot.index;
        let outcome = match slot.worker.as_mut() {
            Some(worker) => worker.request(request, callouts),
            None => Err(ChannelError::Closed),
        };
        outcome.map_err(|source| {
            let error = HostError::Channel { index, source };
            if let Some(worker) = slot.reset() {
                self.stop(worker, false);
            }
            self.inner.reporter.sandbox_failed(index, &error);
            error
        })
    }
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

fn local_param(slot: &Slot, arg: LocalArg) -> Result<CallParam, HostError> {
    match arg {
        LocalArg::Null(flags) => Ok(CallParam::null().with_flags(flags)),
        LocalArg::Data(param) => Ok(param),
        LocalArg::Handle(handle, flags) => {
            if handle.sandbox() != slot.index || handle.generation() != slot.generation {
                return Err(HostError::StaleHandle {
                    handle: handle.id(),
                });
            }
            Ok(CallParam::handle(handle.id()).with_flags(flags))
        }
    }
}

fn wrap_result(slot: &Slot, result: CallResult) -> HostResult {
    match result.into_result() {
        Err(exception) => HostResult::failed(slot.index, exception),
        Ok(outputs) => {
            let handles: BTreeMap<i32, Option<HostHandle>> = outputs
                .into_iter()
                .map(|(position, output)| {
                    let handle = output.map(|produced| {
                        HostHandle::from_slot(slot.index, slot.generation, produced, slot.taint.clone())
                    });
                    (position, handle)
                })
                .collect();
            HostResult::completed(slot.index, handles)
        }
    }
}

fn rejected(
    index: usize,
    request: &'static str,
    response: ControlResponse,
) -> Result<ControlResponse, HostError> {
    match response {
        ControlResponse::Failed { exception } => Err(HostError::Rejected {
            index,
            request,
            exception,
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests;
