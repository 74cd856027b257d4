//! Calls every worker ships in the `warden` package.
//!
//! - `warden/Runtime::noop()`: the warm-up call resolved during preload.
//! - `warden/Runtime::tick()`: bumps a per-package counter.
//! - `warden/Runtime::raise(string)`: fails with the given message.
//! - `warden/Runtime::taint(string)`: adds a label to the caller's taint.
//! - `warden/Vault::store(string, string)` and `::load(string)`: a string
//!   map kept in the host's tainted key-value store.
//! - `warden/Buffer`: a growable text buffer exercising every argument
//!   direction.
//! - `warden/Notify::toast(string)`: shows a notification through the host.
//! - `warden/Events::fire(string, string)`, `::listen(string)`,
//!   `::record(string)` and `::received()`: fire events, subscribe the
//!   recorder to a channel, and collect deliveries.

use serde::{Deserialize, Serialize};
use warden_core::{
    CallDescriptor, CallKind, ComponentName, DescriptorBuilder, DescriptorError, Direction,
    NameError, ParceledPayload, RemoteException, TaintSet, WireValue,
};

use crate::capability::CapabilityCall;
use crate::registry::{CallSpec, PackageModule, RegistryError};

/// Package of the built-in module.
pub const PACKAGE: &str = "warden";

/// Exception type raised by `warden/Runtime::raise`.
pub const RAISED: &str = "warden.Raised";

/// Key-value store backing `warden/Vault`.
pub const VAULT: &str = "warden.vault";

/// Growable text buffer living in the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    /// Current contents.
    pub text: String,
}

impl WireValue for Buffer {
    const TYPE_NAME: &'static str = "warden/Buffer";
}

#[derive(Default)]
struct Ticks(i64);

#[derive(Default)]
struct Received(Vec<String>);

fn component(name: &str) -> Result<ComponentName, DescriptorError> {
    ComponentName::new(PACKAGE, name).map_err(DescriptorError::from)
}

fn static_call(class: &str, method: &str) -> Result<DescriptorBuilder, DescriptorError> {
    Ok(DescriptorBuilder::new(CallKind::Static, component(class)?).method(method))
}

fn instance_call(class: &str, method: &str) -> Result<DescriptorBuilder, DescriptorError> {
    Ok(DescriptorBuilder::new(CallKind::Instance, component(class)?).method(method))
}

/// Descriptor of the warm-up call.
///
/// # Errors
///
/// Never fails for the built-in names; the result mirrors descriptor
/// construction.
pub fn noop_descriptor() -> Result<CallDescriptor, DescriptorError> {
    static_call("Runtime", "noop")?.build()
}

/// Builds the built-in module.
///
/// # Errors
///
/// Returns [`RegistryError`] if a built-in registration is inconsistent.
pub fn module() -> Result<PackageModule, RegistryError> {
    let buffer = component("Buffer")?;
    let record = static_call("Events", "record")?.param::<String>().build()?;
    PackageModule::new(PACKAGE)
        .with_call(CallSpec::new(noop_descriptor()?, |_| Ok(None)))?
        .with_call(
            CallSpec::new(static_call("Runtime", "tick")?.build()?, |call| {
                let ticks = call.package_state(|ticks: &mut Ticks| {
                    ticks.0 = ticks.0.saturating_add(1);
                    ticks.0
                });
                call.returning(ticks)
            })
            .returns_value::<i64>(),
        )?
        .with_call(CallSpec::new(
            static_call("Runtime", "raise")?
                .param::<String>()
                .build()?,
            |call| Err(RemoteException::new(RAISED, call.arg::<String>(0)?)),
        ))?
        .with_call(CallSpec::new(
            DescriptorBuilder::new(CallKind::Constructor, buffer.clone())
                .param::<String>()
                .build()?,
            |call| {
                let text = call.opt_arg::<String>(0)?.unwrap_or_default();
                call.returning(Buffer { text })
            },
        ))?
        .with_call(CallSpec::new(
            instance_call("Buffer", "append")?
                .param::<String>()
                .build()?,
            |call| {
                let suffix = call.arg::<String>(1)?;
                call.with_arg_mut(0, |buffer: &mut Buffer| buffer.text.push_str(&suffix))?;
                Ok(None)
            },
        ))?
        .with_call(
            CallSpec::new(
                instance_call("Buffer", "contents")?.build()?,
                |call| {
                    let buffer = call.arg::<Buffer>(0)?;
                    call.returning(buffer.text)
                },
            )
            .preserves_receiver()
            .returns_value::<String>(),
        )?
        .with_call(
            CallSpec::new(
                static_call("Buffer", "reset")?
                    .object_param(&buffer)
                    .build()?,
                |call| {
                    let fresh = call.object(Buffer::default());
                    call.replace(0, fresh)?;
                    Ok(None)
                },
            )
            .direction(0, Direction::RefInOut),
        )?
        .with_call(
            CallSpec::new(
                static_call("Buffer", "fill")?
                    .object_param(&buffer)
                    .param::<String>()
                    .build()?,
                |call| {
                    let text = call.arg::<String>(1)?;
                    let filled = call.object(Buffer { text });
                    call.replace(0, filled)?;
                    Ok(None)
                },
            )
            .direction(0, Direction::Out),
        )?
        .with_call(CallSpec::new(
            static_call("Notify", "toast")?
                .param::<String>()
                .build()?,
            |call| {
                let text = call.arg::<String>(0)?;
                call.trusted().toast(text)?;
                Ok(None)
            },
        ))?
        .with_call(CallSpec::new(
            static_call("Events", "fire")?
                .param::<String>()
                .param::<String>()
                .build()?,
            |call| {
                let channel = call.arg::<String>(0)?;
                let payload = ParceledPayload::encode(&call.arg::<String>(1)?)
                    .map_err(|error| RemoteException::illegal_argument(error.to_string()))?;
                call.trusted().fire_event(channel, vec![payload])?;
                Ok(None)
            },
        ))?
        .with_call(CallSpec::new(
            static_call("Runtime", "taint")?
                .param::<String>()
                .build()?,
            |call| {
                let label: ComponentName = call
                    .arg::<String>(0)?
                    .parse()
                    .map_err(|error: NameError| RemoteException::illegal_argument(error.to_string()))?;
                call.trusted().call(CapabilityCall::AddTaint {
                    taint: TaintSet::singleton(label),
                })?;
                Ok(None)
            },
        ))?
        .with_call(CallSpec::new(
            static_call("Vault", "store")?
                .param::<String>()
                .param::<String>()
                .build()?,
            |call| {
                let key = call.arg::<String>(0)?;
                let value = ParceledPayload::encode(&call.arg::<String>(1)?)
                    .map_err(|error| RemoteException::illegal_argument(error.to_string()))?;
                call.trusted().kv_put(VAULT, key, value)?;
                Ok(None)
            },
        ))?
        .with_call(
            CallSpec::new(
                static_call("Vault", "load")?.param::<String>().build()?,
                |call| {
                    let key = call.arg::<String>(0)?;
                    match call.trusted().kv_get(VAULT, key)? {
                        Some(payload) => Ok(Some(call.object_encoded(payload))),
                        None => Ok(None),
                    }
                },
            )
            .returns_value::<String>(),
        )?
        .with_call(CallSpec::new(
            static_call("Events", "listen")?
                .param::<String>()
                .build()?,
            move |call| {
                let channel = call.arg::<String>(0)?;
                call.trusted().call(CapabilityCall::Subscribe {
                    channel,
                    subscriber: record.clone(),
                })?;
                Ok(None)
            },
        ))?
        .with_call(CallSpec::new(
            static_call("Events", "record")?.param::<String>().build()?,
            |call| {
                let event = call.arg::<String>(0)?;
                call.package_state(|received: &mut Received| received.0.push(event));
                Ok(None)
            },
        ))?
        .with_call(
            CallSpec::new(
                static_call("Events", "received")?.build()?,
                |call| {
                    let received = call.package_state(|received: &mut Received| received.0.clone());
                    call.returning(received)
                },
            )
            .returns_value::<Vec<String>>(),
        )
}
