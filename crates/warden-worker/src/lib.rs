//! The sandboxed half of the warden runtime.
//!
//! A worker process executes quarantined application code on behalf of the
//! trusted host. It speaks the JSONL control protocol from
//! [`warden_core::protocol`] over stdin and stdout and never touches the
//! outside world except through trusted-API callouts answered by the host.
//!
//! The pieces, from the bottom up:
//!
//! - [`object`]: values with a worker-local identity that stay encoded until
//!   code asks for a concrete type.
//! - [`handle`]: values the host refers to by handle id, destroyed explicitly
//!   or by a sweep.
//! - [`registry`]: the statically registered calls of each package.
//! - [`context`]: lazily materialised per-package execution contexts.
//! - [`resolved`]: a descriptor bound to a registered call, and the marshaling
//!   rules that apply argument directions when it runs.
//! - [`capability`]: trusted-API capabilities and their callout encoding.
//! - [`dispatch`]: the [`Worker`] lifecycle and request dispatch.
//! - [`server`]: the stdio loop multiplexing requests and callouts.
//!
//! Application packages are added by registering a [`PackageModule`]:
//!
//! ```
//! use std::sync::Arc;
//!
//! use warden_core::{CallKind, DescriptorBuilder};
//! use warden_worker::{CallSpec, ModuleRegistry, PackageModule, Worker};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let component = "com.example.app/Greeter".parse()?;
//! let descriptor = DescriptorBuilder::new(CallKind::Static, component)
//!     .method("greet")
//!     .param::<String>()
//!     .build()?;
//! let module = PackageModule::new("com.example.app").with_call(
//!     CallSpec::new(descriptor, |call| {
//!         let name: String = call.arg(0)?;
//!         call.returning(format!("hello, {name}"))
//!     })
//!     .returns_value::<String>(),
//! )?;
//! let registry = ModuleRegistry::with_builtins()?.with_module(module)?;
//! let worker = Worker::new(Arc::new(registry));
//! # drop(worker);
//! # Ok(()) }
//! ```

pub mod builtin;
pub mod capability;
pub mod context;
pub mod dispatch;
mod error;
pub mod handle;
pub mod invocation;
pub mod launch;
pub mod object;
pub mod registry;
pub mod resolved;
pub mod server;
mod sync;
pub mod telemetry;

pub use capability::{Capability, CapabilityCall, CalloutPort, TrustedApi};
pub use dispatch::Worker;
pub use error::WorkerError;
pub use invocation::Invocation;
pub use object::{Object, ObjectIds, SandboxValue};
pub use registry::{CallHandler, CallSpec, ModuleRegistry, PackageModule, RegistryError};
pub use server::serve;

#[cfg(test)]
mod tests;
