//! The trusted API served to sandboxed code.
//!
//! Every callout a worker makes while running a call lands in
//! [`TrustedServices::handle`] together with the [`CallScope`] of that call.
//! Sink-bound capabilities consult the [`PolicyEngine`] with the scope's
//! taint before acting; a silent rejection skips delivery and still returns
//! success to the caller. Capabilities that read tainted data widen the
//! scope's taint, which the pool then folds into the sandbox.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};
use warden_core::protocol::Callout;
use warden_core::{ParceledPayload, RemoteException, TaintSet};
use warden_policy::{ManifestRegistry, PolicyEngine, SinkRequest, TaintContext, sinks};
use warden_worker::CapabilityCall;

use crate::connection::CalloutHandler;
use crate::events::EventBridge;
use crate::store::StoreRegistry;
use crate::sync::lock;

const SERVICES_TARGET: &str = "wardend::services";

/// Identity and taint of the call a callout belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CallScope {
    sandbox: usize,
    package: String,
    taint: TaintSet,
}

impl CallScope {
    /// Scope of a call into `package` running in `sandbox` with `taint`.
    #[must_use]
    pub fn new(sandbox: usize, package: impl Into<String>, taint: TaintSet) -> Self {
        Self {
            sandbox,
            package: package.into(),
            taint,
        }
    }

    /// Slot running the call.
    #[must_use]
    pub const fn sandbox(&self) -> usize {
        self.sandbox
    }

    /// Package that owns the called code.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Current taint.
    #[must_use]
    pub const fn taint(&self) -> &TaintSet {
        &self.taint
    }

    /// Widens the taint.
    pub fn add_taint(&mut self, taint: &TaintSet) {
        self.taint = self.taint.merge(taint);
    }

    /// Removes labels owned by the scope's package.
    ///
    /// # Errors
    ///
    /// Returns a security exception, leaving the taint unchanged, when any
    /// label belongs to another package.
    pub fn remove_own_taint(&mut self, taint: &TaintSet) -> Result<(), RemoteException> {
        if let Some(foreign) = taint.labels().find(|label| label.package() != self.package) {
            return Err(RemoteException::security(format!(
                "package '{}' may not remove taint {foreign}",
                self.package
            )));
        }
        self.taint = taint
            .labels()
            .fold(self.taint.to_builder(), |builder, label| {
                builder.remove_taint(label)
            })
            .build();
        Ok(())
    }

    /// Consumes the scope, returning its final taint.
    #[must_use]
    pub fn into_taint(self) -> TaintSet {
        self.taint
    }
}

impl TaintContext for CallScope {
    fn current_taint(&self) -> Option<TaintSet> {
        Some(self.taint.clone())
    }
}

/// Delivers notifications.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Shows a short notification on behalf of `package`.
    ///
    /// # Errors
    ///
    /// Returns the exception handed back to the caller.
    fn toast(&self, package: &str, text: &str) -> Result<(), RemoteException>;

    /// Posts a push notification to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns the exception handed back to the caller.
    fn push(&self, endpoint: &str, title: &str, body: &str) -> Result<(), RemoteException>;
}

/// Switches home devices.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceController: Send + Sync {
    /// Turns `device` on or off.
    ///
    /// # Errors
    ///
    /// Returns the exception handed back to the caller.
    fn set_switch(&self, device: &str, on: bool) -> Result<(), RemoteException>;
}

/// Notifier that records notifications in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn toast(&self, package: &str, text: &str) -> Result<(), RemoteException> {
        info!(target: SERVICES_TARGET, package, text, "toast");
        Ok(())
    }

    fn push(&self, endpoint: &str, title: &str, body: &str) -> Result<(), RemoteException> {
        info!(target: SERVICES_TARGET, endpoint, title, body, "push notification");
        Ok(())
    }
}

/// Device controller that records switch changes in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDevices;

impl DeviceController for LoggingDevices {
    fn set_switch(&self, device: &str, on: bool) -> Result<(), RemoteException> {
        info!(target: SERVICES_TARGET, device, on, "switch set");
        Ok(())
    }
}

/// Values shown in sensitive views, with the taint of whoever wrote them.
#[derive(Debug, Default)]
pub struct SensitiveViews {
    values: Mutex<BTreeMap<String, (ParceledPayload, TaintSet)>>,
}

impl SensitiveViews {
    /// Records the value shown in `view`.
    pub fn write(&self, view: impl Into<String>, value: ParceledPayload, taint: TaintSet) {
        lock(&self.values).insert(view.into(), (value, taint));
    }

    /// Value shown in `view` and its taint.
    #[must_use]
    pub fn read(&self, view: &str) -> Option<(ParceledPayload, TaintSet)> {
        lock(&self.values).get(view).cloned()
    }
}

/// Host implementations of every capability.
pub struct TrustedServices {
    engine: PolicyEngine,
    notifier: Arc<dyn Notifier>,
    devices: Arc<dyn DeviceController>,
    views: SensitiveViews,
    stores: StoreRegistry,
    events: EventBridge,
    push_endpoint: String,
}

impl TrustedServices {
    /// Builds services checking sinks against `manifests`, with logging
    /// notification and device backends.
    #[must_use]
    pub fn new(manifests: Arc<ManifestRegistry>, push_endpoint: impl Into<String>) -> Self {
        Self {
            engine: PolicyEngine::new(Arc::clone(&manifests)),
            notifier: Arc::new(LoggingNotifier),
            devices: Arc::new(LoggingDevices),
            views: SensitiveViews::default(),
            stores: StoreRegistry::new(),
            events: EventBridge::new(manifests),
            push_endpoint: push_endpoint.into(),
        }
    }

    /// Replaces the notification backend.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the device backend.
    #[must_use]
    pub fn with_devices(mut self, devices: Arc<dyn DeviceController>) -> Self {
        self.devices = devices;
        self
    }

    /// Policy engine consulted for sinks.
    #[must_use]
    pub const fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Shared key-value stores.
    #[must_use]
    pub const fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// Event subscriptions and queued deliveries.
    #[must_use]
    pub const fn events(&self) -> &EventBridge {
        &self.events
    }

    /// Sensitive view values.
    #[must_use]
    pub const fn views(&self) -> &SensitiveViews {
        &self.views
    }

    /// Runs one callout for the call described by `scope`.
    ///
    /// # Errors
    ///
    /// Returns an unknown-capability or illegal-argument exception for a
    /// malformed callout, a security exception when policy rejects a sink,
    /// or whatever a backend raised.
    pub fn handle(&self, scope: &mut CallScope, callout: &Callout) -> Result<Value, RemoteException> {
        let call = CapabilityCall::from_callout(callout)?;
        debug!(
            target: SERVICES_TARGET,
            sandbox = scope.sandbox(),
            package = scope.package(),
            capability = %call.capability(),
            method = %callout.method,
            "serving capability"
        );
        match call {
            CapabilityCall::Toast { text } => {
                if self.permits(scope, SinkRequest::new(sinks::TOAST))? {
                    self.notifier.toast(scope.package(), &text)?;
                }
                Ok(Value::Null)
            }
            CapabilityCall::Push { title, body } => {
                let request = SinkRequest::network(sinks::NETWORK, self.push_endpoint.as_str());
                if self.permits(scope, request)? {
                    self.notifier.push(&self.push_endpoint, &title, &body)?;
                }
                Ok(Value::Null)
            }
            CapabilityCall::AddTaint { taint } => {
                scope.add_taint(&taint);
                Ok(Value::Null)
            }
            CapabilityCall::RemoveTaint { taint } => {
                scope.remove_own_taint(&taint)?;
                Ok(Value::Null)
            }
            CapabilityCall::Subscribe {
                channel,
                subscriber,
            } => {
                self.events
                    .subscribe(scope.package(), scope.taint(), &channel, subscriber)?;
                Ok(Value::Null)
            }
            CapabilityCall::Unsubscribe {
                channel,
                subscriber,
            } => {
                let removed = self
                    .events
                    .unsubscribe(scope.package(), &channel, &subscriber)?;
                Ok(Value::Bool(removed))
            }
            CapabilityCall::Fire { channel, args } => {
                let queued = self
                    .events
                    .fire(scope.package(), scope.taint(), &channel, args)?;
                Ok(Value::from(queued))
            }
            CapabilityCall::SmartSwitch { device, on } => {
                if self.permits(scope, SinkRequest::new(sinks::SMARTSWITCH))? {
                    self.devices.set_switch(&device, on)?;
                }
                Ok(Value::Null)
            }
            CapabilityCall::UiWrite { view, value } => {
                self.views.write(view, value, scope.taint().clone());
                Ok(Value::Null)
            }
            CapabilityCall::UiRead { view } => {
                let found = self.views.read(&view).map(|(value, taint)| {
                    scope.add_taint(&taint);
                    value
                });
                to_json(found.as_ref())
            }
            CapabilityCall::KvGet { store, key } => {
                let found = self
                    .stores
                    .get(&store)
                    .and_then(|opened| opened.read(&key))
                    .map(|(value, taint)| {
                        scope.add_taint(&taint);
                        value
                    });
                to_json(found.as_ref())
            }
            CapabilityCall::KvPut { store, key, value } => {
                self.stores.open(&store).put(key, value, scope.taint());
                Ok(Value::Null)
            }
            CapabilityCall::KvAddTaint { store, key, taint } => {
                self.stores
                    .open(&store)
                    .edit()
                    .add_taint(key, &taint)
                    .commit(scope.taint());
                Ok(Value::Null)
            }
            CapabilityCall::KvAddTaintToAll { store, taint } => {
                self.stores
                    .open(&store)
                    .edit()
                    .add_taint_to_all(&taint)
                    .commit(scope.taint());
                Ok(Value::Null)
            }
        }
    }

    fn permits(&self, scope: &CallScope, mut request: SinkRequest) -> Result<bool, RemoteException> {
        let accepted = self.engine.check_caller_sink(scope, &mut request)?;
        if !accepted {
            debug!(
                target: SERVICES_TARGET,
                sandbox = scope.sandbox(),
                sink = request.sink(),
                "sink request dropped"
            );
        }
        Ok(accepted)
    }
}

impl std::fmt::Debug for TrustedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustedServices")
            .field("push_endpoint", &self.push_endpoint)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

fn to_json(value: Option<&ParceledPayload>) -> Result<Value, RemoteException> {
    serde_json::to_value(value).map_err(|error| RemoteException::protocol(error.to_string()))
}

/// Callout handler bound to one running call.
#[derive(Debug)]
pub struct ServiceSession<'a> {
    services: &'a TrustedServices,
    scope: &'a mut CallScope,
}

impl<'a> ServiceSession<'a> {
    /// Binds `services` to `scope`.
    #[must_use]
    pub const fn new(services: &'a TrustedServices, scope: &'a mut CallScope) -> Self {
        Self { services, scope }
    }
}

impl CalloutHandler for ServiceSession<'_> {
    fn handle(&mut self, callout: Callout) -> Result<Value, RemoteException> {
        self.services.handle(self.scope, &callout)
    }
}

#[cfg(test)]
mod tests;
