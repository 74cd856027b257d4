//! Host daemon for the warden sandbox runtime.
//!
//! `wardend` keeps a fixed pool of worker processes, each able to run
//! quarantined application code, and mediates everything that code may do
//! outside its sandbox. Calls enter through [`SandboxManager`]:
//!
//! 1. the manager picks a sandbox, honouring explicit overrides and the
//!    sandbox of any [`HostHandle`] argument, and otherwise choosing a slot
//!    whose accumulated taint is already covered by the call's taint;
//! 2. the worker is started and bound lazily the first time its slot is
//!    used;
//! 3. while the call runs, the worker's trusted API callouts are served by
//!    [`TrustedServices`], which checks every sink against the package
//!    manifests through the policy engine;
//! 4. outputs come back as [`HostHandle`]s that stay inside the sandbox
//!    until marshaled out.
//!
//! Events fired by sandboxed code are delivered to their subscribers as
//! asynchronous calls once the firing call has finished.
//!
//! The binary wires these together from [`warden_config::Config`] via
//! [`bootstrap`] and runs until a termination signal arrives.

pub mod bootstrap;
pub mod call;
pub mod channel;
pub mod connection;
mod error;
pub mod events;
pub mod handle;
pub mod health;
pub mod pool;
pub mod services;
pub mod shutdown;
pub mod store;
mod sync;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap,
    bootstrap_with,
};
pub use call::{HostCall, HostResult, PendingCall};
pub use channel::{ChannelError, ControlChannel, WorkerLauncher};
pub use error::HostError;
pub use handle::{HostArg, HostHandle};
pub use health::{HealthReporter, SandboxEvent, StructuredHealthReporter};
pub use pool::{PoolSettings, SandboxManager};
pub use services::TrustedServices;
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
