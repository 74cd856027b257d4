//! Event channels between packages.
//!
//! Channels are named `package/channel`. A package may always subscribe to
//! and fire its own channels; other packages need the owner's manifest to
//! export the channel for that operation. Subscribers are static calls of
//! the subscribing package. Firing never runs subscribers inline: each
//! matching subscription becomes a [`Delivery`] queued until the firing
//! call has finished, so a sandbox can fire into its own package without
//! waiting on itself.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;
use warden_core::{CallDescriptor, CallKind, ComponentName, ParceledPayload, RemoteException, TaintSet};
use warden_policy::{ChannelDecl, ManifestRegistry};

use crate::sync::lock;

const EVENTS_TARGET: &str = "wardend::events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Subscribe,
    Fire,
}

#[derive(Debug, Clone)]
struct Subscription {
    subscriber: CallDescriptor,
    taint: TaintSet,
}

/// One event to hand to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    channel: ComponentName,
    subscriber: CallDescriptor,
    args: Vec<ParceledPayload>,
    taint: TaintSet,
}

impl Delivery {
    /// Channel the event was fired on.
    #[must_use]
    pub const fn channel(&self) -> &ComponentName {
        &self.channel
    }

    /// Static call to invoke.
    #[must_use]
    pub const fn subscriber(&self) -> &CallDescriptor {
        &self.subscriber
    }

    /// Encoded event arguments.
    #[must_use]
    pub fn args(&self) -> &[ParceledPayload] {
        &self.args
    }

    /// Firing taint merged with the subscriber's taint at subscription.
    #[must_use]
    pub const fn taint(&self) -> &TaintSet {
        &self.taint
    }
}

/// Subscription table and delivery queue.
#[derive(Debug)]
pub struct EventBridge {
    manifests: Arc<ManifestRegistry>,
    subscriptions: Mutex<BTreeMap<ComponentName, Vec<Subscription>>>,
    pending: Mutex<VecDeque<Delivery>>,
}

impl EventBridge {
    /// Creates a bridge checking exports against `manifests`.
    #[must_use]
    pub fn new(manifests: Arc<ManifestRegistry>) -> Self {
        Self {
            manifests,
            subscriptions: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Subscribes `subscriber` to `channel` on behalf of `package`.
    ///
    /// Subscribing the same call twice replaces the recorded taint.
    ///
    /// # Errors
    ///
    /// Returns an illegal-argument exception for a malformed channel or a
    /// subscriber that is not a static call of `package`, and a security
    /// exception when the channel is not exported for subscription.
    pub fn subscribe(
        &self,
        package: &str,
        taint: &TaintSet,
        channel: &str,
        subscriber: CallDescriptor,
    ) -> Result<(), RemoteException> {
        let name = self.authorise(package, channel, Access::Subscribe)?;
        check_subscriber(package, &subscriber)?;
        let mut subscriptions = lock(&self.subscriptions);
        let entries = subscriptions.entry(name.clone()).or_default();
        entries.retain(|existing| existing.subscriber != subscriber);
        debug!(target: EVENTS_TARGET, channel = %name, %subscriber, "subscribed");
        entries.push(Subscription {
            subscriber,
            taint: taint.clone(),
        });
        Ok(())
    }

    /// Removes a subscription; `false` when there was none.
    ///
    /// # Errors
    ///
    /// As for [`EventBridge::subscribe`].
    pub fn unsubscribe(
        &self,
        package: &str,
        channel: &str,
        subscriber: &CallDescriptor,
    ) -> Result<bool, RemoteException> {
        let name = self.authorise(package, channel, Access::Subscribe)?;
        let mut subscriptions = lock(&self.subscriptions);
        let Some(entries) = subscriptions.get_mut(&name) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|existing| &existing.subscriber != subscriber);
        let removed = entries.len() != before;
        if entries.is_empty() {
            subscriptions.remove(&name);
        }
        debug!(target: EVENTS_TARGET, channel = %name, %subscriber, removed, "unsubscribed");
        Ok(removed)
    }

    /// Fires an event from sandboxed code running for `package`.
    ///
    /// Returns the number of deliveries queued.
    ///
    /// # Errors
    ///
    /// Returns an illegal-argument exception for a malformed channel and a
    /// security exception when the channel is not exported for firing.
    pub fn fire(
        &self,
        package: &str,
        taint: &TaintSet,
        channel: &str,
        args: Vec<ParceledPayload>,
    ) -> Result<usize, RemoteException> {
        let name = self.authorise(package, channel, Access::Fire)?;
        Ok(self.fire_event(taint, &name, args))
    }

    /// Fires an event from the host, bypassing export checks.
    ///
    /// Returns the number of deliveries queued.
    pub fn fire_event(
        &self,
        taint: &TaintSet,
        channel: &ComponentName,
        args: Vec<ParceledPayload>,
    ) -> usize {
        let deliveries: Vec<Delivery> = lock(&self.subscriptions)
            .get(channel)
            .map(|entries| {
                entries
                    .iter()
                    .map(|subscription| Delivery {
                        channel: channel.clone(),
                        subscriber: subscription.subscriber.clone(),
                        args: args.clone(),
                        taint: taint.merge(&subscription.taint),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let queued = deliveries.len();
        debug!(target: EVENTS_TARGET, %channel, %taint, queued, "event fired");
        lock(&self.pending).extend(deliveries);
        queued
    }

    /// Drains queued deliveries.
    #[must_use]
    pub fn take_pending(&self) -> Vec<Delivery> {
        lock(&self.pending).drain(..).collect()
    }

    /// Number of subscriptions on `channel`.
    #[must_use]
    pub fn subscribers(&self, channel: &ComponentName) -> usize {
        lock(&self.subscriptions).get(channel).map_or(0, Vec::len)
    }

    fn authorise(
        &self,
        package: &str,
        channel: &str,
        access: Access,
    ) -> Result<ComponentName, RemoteException> {
        let name = channel.parse::<ComponentName>().map_err(|error| {
            RemoteException::illegal_argument(format!("invalid channel '{channel}': {error}"))
        })?;
        if name.package() == package {
            return Ok(name);
        }
        let exported = self
            .manifests
            .channel(&name)
            .map(ChannelDecl::exported)
            .unwrap_or_default();
        let allowed = match access {
            Access::Subscribe => exported.allows_subscribe(),
            Access::Fire => exported.allows_fire(),
        };
        if allowed {
            Ok(name)
        } else {
            let verb = match access {
                Access::Subscribe => "subscribe to",
                Access::Fire => "fire on",
            };
            Err(RemoteException::security(format!(
                "package '{package}' may not {verb} channel '{name}'"
            )))
        }
    }
}

fn check_subscriber(package: &str, subscriber: &CallDescriptor) -> Result<(), RemoteException> {
    if subscriber.kind() != CallKind::Static {
        return Err(RemoteException::illegal_argument(format!(
            "subscriber {subscriber} is not a static call"
        )));
    }
    if subscriber.component().package() != package {
        return Err(RemoteException::security(format!(
            "package '{package}' may not subscribe {subscriber} owned by another package"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
