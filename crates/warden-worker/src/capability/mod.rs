//! Trusted capabilities reachable from sandboxed code.
//!
//! Sandboxed code never touches a sink directly. It asks the host through a
//! [`Callout`] frame naming a [`Capability`] and a method; the host checks
//! the worker's taint against the policy before acting. Only capabilities
//! granted at bind time are reachable. Any other name resolves to nothing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};
use warden_core::protocol::Callout;
use warden_core::{CallDescriptor, ParceledPayload, RemoteException, TaintSet, kinds};

const CAPABILITY_TARGET: &str = "warden_worker::capability";

/// Capabilities the host can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Capability {
    /// Short on-screen notifications.
    Toast,
    /// Remote push notifications.
    Push,
    /// Adjusting the caller's own taint.
    Taint,
    /// Event channels between packages.
    Event,
    /// Switchable home devices.
    SmartSwitch,
    /// Sensitive view values.
    Ui,
    /// Tainted key-value stores.
    Kvs,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Toast,
        Self::Push,
        Self::Taint,
        Self::Event,
        Self::SmartSwitch,
        Self::Ui,
        Self::Kvs,
    ];

    /// Parses granted capability names, dropping names that resolve to
    /// nothing.
    #[must_use]
    pub fn parse_grants(names: &[String]) -> Vec<Self> {
        names
            .iter()
            .filter_map(|name| {
                let parsed = name.parse().ok();
                if parsed.is_none() {
                    warn!(target: CAPABILITY_TARGET, capability = %name, "unknown capability ignored");
                }
                parsed
            })
            .collect()
    }
}

/// A typed capability invocation.
///
/// Serialises as `{"method": "<capability>.<method>", "args": {...}}`, which
/// [`CapabilityCall::into_callout`] splits into the callout fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum CapabilityCall {
    /// Shows a notification.
    #[serde(rename = "toast.show")]
    Toast {
        /// Text shown.
        text: String,
    },
    /// Sends a push notification.
    #[serde(rename = "push.send")]
    Push {
        /// Notification title.
        title: String,
        /// Notification body.
        body: String,
    },
    /// Adds labels to the caller's taint.
    #[serde(rename = "taint.add")]
    AddTaint {
        /// Labels to add.
        taint: TaintSet,
    },
    /// Removes labels owned by the caller's package from its taint.
    #[serde(rename = "taint.remove")]
    RemoveTaint {
        /// Labels to remove.
        taint: TaintSet,
    },
    /// Subscribes a static call to a channel.
    #[serde(rename = "event.subscribe")]
    Subscribe {
        /// Channel name, `package/channel`.
        channel: String,
        /// Static call invoked for each event.
        subscriber: CallDescriptor,
    },
    /// Removes a subscription.
    #[serde(rename = "event.unsubscribe")]
    Unsubscribe {
        /// Channel name.
        channel: String,
        /// Previously subscribed call.
        subscriber: CallDescriptor,
    },
    /// Fires an event.
    #[serde(rename = "event.fire")]
    Fire {
        /// Channel name.
        channel: String,
        /// Encoded event arguments.
        args: Vec<ParceledPayload>,
    },
    /// Switches a device.
    #[serde(rename = "smartswitch.set")]
    SmartSwitch {
        /// Device identifier.
        device: String,
        /// Desired state.
        on: bool,
    },
    /// Writes a sensitive view value.
    #[serde(rename = "ui.write")]
    UiWrite {
        /// View identifier.
        view: String,
        /// Encoded value.
        value: ParceledPayload,
    },
    /// Reads a sensitive view value, tainting the caller.
    #[serde(rename = "ui.read")]
    UiRead {
        /// View identifier.
        view: String,
    },
    /// Reads a key.
    #[serde(rename = "kvs.get")]
    KvGet {
        /// Store name.
        store: String,
        /// Key.
        key: String,
    },
    /// Writes a key.
    #[serde(rename = "kvs.put")]
    KvPut {
        /// Store name.
        store: String,
        /// Key.
        key: String,
        /// Encoded value.
        value: ParceledPayload,
    },
    /// Adds taint to one key.
    #[serde(rename = "kvs.add_taint")]
    KvAddTaint {
        /// Store name.
        store: String,
        /// Key.
        key: String,
        /// Labels to add.
        taint: TaintSet,
    },
    /// Adds taint to every key.
    #[serde(rename = "kvs.add_taint_to_all")]
    KvAddTaintToAll {
        /// Store name.
        store: String,
        /// Labels to add.
        taint: TaintSet,
    },
}

impl CapabilityCall {
    /// Capability the call needs.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Toast { .. } => Capability::Toast,
            Self::Push { .. } => Capability::Push,
            Self::AddTaint { .. } | Self::RemoveTaint { .. } => Capability::Taint,
            Self::Subscribe { .. } | Self::Unsubscribe { .. } | Self::Fire { .. } => {
                Capability::Event
            }
            Self::SmartSwitch { .. } => Capability::SmartSwitch,
            Self::UiWrite { .. } | Self::UiRead { .. } => Capability::Ui,
            Self::KvGet { .. }
            | Self::KvPut { .. }
            | Self::KvAddTaint { .. }
            | Self::KvAddTaintToAll { .. } => Capability::Kvs,
        }
    }

    /// Converts into a callout frame body.
    ///
    /// # Errors
    ///
    /// Returns a protocol exception when the arguments fail to serialise.
    pub fn into_callout(self) -> Result<Callout, RemoteException> {
        let encoded = serde_json::to_value(&self)
            .map_err(|error| RemoteException::protocol(error.to_string()))?;
        let qualified = encoded
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let method = qualified
            .split_once('.')
            .map_or(qualified, |(_, method)| method)
            .to_owned();
        let args = encoded.get("args").cloned().unwrap_or(Value::Null);
        Ok(Callout {
            capability: self.capability().to_string(),
            method,
            args,
        })
    }

    /// Parses a callout frame body.
    ///
    /// # Errors
    ///
    /// Returns an unknown-capability exception for names that resolve to
    /// nothing, or an illegal-argument exception for malformed arguments.
    pub fn from_callout(callout: &Callout) -> Result<Self, RemoteException> {
        let capability: Capability = callout.capability.parse().map_err(|_| {
            RemoteException::new(
                kinds::UNKNOWN_CAPABILITY,
                format!("unknown capability '{}'", callout.capability),
            )
        })?;
        let tagged = serde_json::json!({
            "method": format!("{capability}.{}", callout.method),
            "args": callout.args,
        });
        serde_json::from_value(tagged).map_err(|error| {
            RemoteException::illegal_argument(format!(
                "invalid {}.{} callout: {error}",
                callout.capability, callout.method
            ))
        })
    }
}

/// Channel a worker uses to reach the host during a call.
#[cfg_attr(test, mockall::automock)]
pub trait CalloutPort {
    /// Sends a callout and waits for the host's answer.
    ///
    /// # Errors
    ///
    /// Returns the host's exception, or a dead-object exception when the
    /// channel is gone.
    fn callout(&mut self, callout: Callout) -> Result<Value, RemoteException>;
}

/// Typed access to the capabilities granted to this worker.
pub struct TrustedApi<'a> {
    grants: &'a [Capability],
    port: &'a mut dyn CalloutPort,
}

impl<'a> TrustedApi<'a> {
    /// Wraps a callout port with the granted capabilities.
    #[must_use]
    pub const fn new(grants: &'a [Capability], port: &'a mut dyn CalloutPort) -> Self {
        Self { grants, port }
    }

    /// Resolves a capability by name; unknown or ungranted names give `None`.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<Capability> {
        name.parse()
            .ok()
            .filter(|capability| self.grants.contains(capability))
    }

    /// Invokes a capability.
    ///
    /// # Errors
    ///
    /// Returns an unknown-capability exception when the capability was not
    /// granted, or whatever the host raised.
    pub fn call(&mut self, call: CapabilityCall) -> Result<Value, RemoteException> {
        let capability = call.capability();
        if !self.grants.contains(&capability) {
            return Err(RemoteException::new(
                kinds::UNKNOWN_CAPABILITY,
                format!("capability '{capability}' was not granted"),
            ));
        }
        let callout = call.into_callout()?;
        debug!(
            target: CAPABILITY_TARGET,
            capability = %capability,
            method = %callout.method,
            "calling out to host"
        );
        self.port.callout(callout)
    }

    /// Shows a notification.
    ///
    /// # Errors
    ///
    /// See [`TrustedApi::call`].
    pub fn toast(&mut self, text: impl Into<String>) -> Result<(), RemoteException> {
        self.call(CapabilityCall::Toast { text: text.into() })
            .map(drop)
    }

    /// Sends a push notification.
    ///
    /// # Errors
    ///
    /// See [`TrustedApi::call`].
    pub fn push(
        &mut self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), RemoteException> {
        self.call(CapabilityCall::Push {
            title: title.into(),
            body: body.into(),
        })
        .map(drop)
    }

    /// Fires an event on a channel.
    ///
    /// # Errors
    ///
    /// See [`TrustedApi::call`].
    pub fn fire_event(
        &mut self,
        channel: impl Into<String>,
        args: Vec<ParceledPayload>,
    ) -> Result<(), RemoteException> {
        self.call(CapabilityCall::Fire {
            channel: channel.into(),
            args,
        })
        .map(drop)
    }

    /// Reads a key from a tainted store.
    ///
    /// # Errors
    ///
    /// See [`TrustedApi::call`]; malformed answers are protocol exceptions.
    pub fn kv_get(
        &mut self,
        store: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Option<ParceledPayload>, RemoteException> {
        let value = self.call(CapabilityCall::KvGet {
            store: store.into(),
            key: key.into(),
        })?;
        serde_json::from_value(value).map_err(|error| RemoteException::protocol(error.to_string()))
    }

    /// Writes a key to a tainted store.
    ///
    /// # Errors
    ///
    /// See [`TrustedApi::call`].
    pub fn kv_put(
        &mut self,
        store: impl Into<String>,
        key: impl Into<String>,
        value: ParceledPayload,
    ) -> Result<(), RemoteException> {
        self.call(CapabilityCall::KvPut {
            store: store.into(),
            key: key.into(),
            value,
        })
        .map(drop)
    }
}

impl std::fmt::Debug for TrustedApi<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustedApi")
            .field("grants", &self.grants)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
