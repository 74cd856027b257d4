//! Unit tests for the sandbox pool, driven through in-process workers.

use std::sync::Arc;

use rstest::{fixture, rstest};
use warden_core::protocol::WorkerState;
use warden_core::{CallDescriptor, CallFlags, ComponentName, ParceledPayload, TaintSet, kinds};
use warden_policy::{Filter, ManifestRegistry, PackageManifest, Policy, Rule, Source, sinks};
use warden_worker::ModuleRegistry;
use warden_worker::builtin::{Buffer, RAISED};

use super::{PoolSettings, SandboxManager};
use crate::call::{HostCall, PendingCall};
use crate::channel::{ChannelError, InProcessLauncher, MockWorkerLauncher};
use crate::error::HostError;
use crate::handle::{HostArg, HostHandle};
use crate::health::{MockHealthReporter, SandboxEvent, StructuredHealthReporter};
use crate::services::{MockNotifier, TrustedServices};

const SECRET: &str = "secret.app/contacts";

fn descriptor(text: &str) -> CallDescriptor {
    text.parse().expect("descriptor")
}

fn label(text: &str) -> ComponentName {
    text.parse().expect("label")
}

fn text(value: &str) -> HostArg {
    HostArg::value(&value.to_owned()).expect("encode")
}

fn manifests() -> Arc<ManifestRegistry> {
    let mut registry = ManifestRegistry::new();
    registry
        .register(
            PackageManifest::new("secret.app")
                .with_source(Source::new(
                    label(SECRET),
                    "contacts",
                    Policy::new(vec![Rule::deny(
                        Filter::sink(sinks::TOAST),
                        "contacts may not be shown",
                    )]),
                ))
                .expect("source"),
        )
        .expect("register");
    Arc::new(registry)
}

fn pool_with(pool_size: usize, services: TrustedServices) -> SandboxManager {
    let modules = Arc::new(ModuleRegistry::with_builtins().expect("builtins"));
    SandboxManager::new(
        PoolSettings::new(pool_size),
        Arc::new(InProcessLauncher::new(modules)),
        services,
        Arc::new(StructuredHealthReporter::new()),
    )
}

fn pool_of(pool_size: usize) -> SandboxManager {
    pool_with(pool_size, TrustedServices::new(manifests(), "https://push.example/"))
}

#[fixture]
fn pool() -> SandboxManager {
    pool_of(2)
}

fn tick(pool: &SandboxManager, call: HostCall) -> (usize, i64) {
    let result = pool.call(call).expect("tick");
    let handle = result.return_value().expect("completed").expect("value").clone();
    let ticks = pool.read::<i64>(&handle).expect("read").expect("non-null");
    (result.sandbox(), ticks)
}

fn taint_sandbox(pool: &SandboxManager, index: u32) {
    let result = pool
        .call(
            HostCall::new(descriptor("warden/Runtime::taint(string)"))
                .arg(text(SECRET))
                .flags(CallFlags::empty().with_sandbox(index)),
        )
        .expect("taint");
    assert!(!result.is_error());
}

fn new_buffer(pool: &SandboxManager, index: u32, contents: &str) -> HostHandle {
    let result = pool
        .call(
            HostCall::new(descriptor("new warden/Buffer(string)"))
                .arg(text(contents))
                .flags(CallFlags::empty().with_sandbox(index)),
        )
        .expect("construct");
    result.return_value().expect("completed").expect("buffer").clone()
}

// ---------------------------------------------------------------------------
// Calls and results
// ---------------------------------------------------------------------------

#[rstest]
fn untainted_calls_reuse_a_started_sandbox(pool: SandboxManager) {
    let tick_call = || HostCall::new(descriptor("warden/Runtime::tick()"));

    assert_eq!(tick(&pool, tick_call()), (0, 1));
    assert_eq!(tick(&pool, tick_call()), (0, 2));
}

#[rstest]
fn callee_failures_are_results_not_errors(pool: SandboxManager) {
    let result = pool
        .call(HostCall::new(descriptor("warden/Runtime::raise(string)")).arg(text("boom")))
        .expect("call");

    let exception = result.throwable().expect("raised");
    assert_eq!(exception.type_name(), RAISED);
    assert_eq!(exception.message(), "boom");
}

#[rstest]
fn unknown_calls_fail_resolution(pool: SandboxManager) {
    let result = pool
        .call(HostCall::new(descriptor("warden/Runtime::missing()")))
        .expect("call");

    assert!(result.is_error());
}

#[rstest]
fn handles_route_calls_to_their_sandbox(pool: SandboxManager) {
    let buffer = new_buffer(&pool, 1, "ab");
    pool.call(
        HostCall::new(descriptor("warden/Buffer#append(string)"))
            .arg(HostArg::handle(buffer.clone()))
            .arg(text("cd")),
    )
    .expect("append");

    let result = pool
        .call(HostCall::new(descriptor("warden/Buffer#contents()")).arg(HostArg::handle(buffer.clone())))
        .expect("contents");
    let contents = result.return_value().expect("completed").expect("value").clone();

    assert_eq!(result.sandbox(), 1);
    assert_eq!(buffer.actual_type(), "warden/Buffer");
    assert_eq!(pool.read::<String>(&contents).expect("read"), Some(String::from("abcd")));
    assert_eq!(
        pool.read::<Buffer>(&buffer).expect("read"),
        Some(Buffer { text: String::from("abcd") })
    );
}

#[rstest]
fn foreign_handles_are_marshaled_across(pool: SandboxManager) {
    let buffer = new_buffer(&pool, 0, "shared");

    let result = pool
        .call(
            HostCall::new(descriptor("warden/Buffer#contents()"))
                .arg(HostArg::handle(buffer))
                .flags(CallFlags::empty().with_sandbox(1)),
        )
        .expect("contents");
    let contents = result.return_value().expect("completed").expect("value").clone();

    assert_eq!(result.sandbox(), 1);
    assert_eq!(pool.read::<String>(&contents).expect("read"), Some(String::from("shared")));
}

#[rstest]
fn sync_only_handles_do_not_cross_sandboxes(pool: SandboxManager) {
    let buffer = new_buffer(&pool, 0, "local");

    let result = pool
        .call(
            HostCall::new(descriptor("warden/Buffer#contents()"))
                .arg(HostArg::handle(buffer).sync_only())
                .flags(CallFlags::empty().with_sandbox(1)),
        )
        .expect("contents");

    assert!(result.is_error());
}

#[rstest]
fn released_handles_are_gone(pool: SandboxManager) {
    let buffer = new_buffer(&pool, 0, "once");

    assert_eq!(
        pool.marshal_out(&buffer, true).expect("marshal"),
        Some(ParceledPayload::encode(&Buffer { text: String::from("once") }).expect("encode"))
    );
    let error = pool.marshal_out(&buffer, false).expect_err("released");

    assert!(matches!(error, HostError::Rejected { exception, .. } if exception.is_kind(kinds::HANDLE_DESTROYED)));
}

#[rstest]
fn asynchronous_calls_complete_in_the_background(pool: SandboxManager) {
    let pending = pool.submit(
        HostCall::new(descriptor("warden/Runtime::noop()")).flags(CallFlags::NO_RETURN_VALUE),
    );

    assert!(pending.is_async());
    assert!(!pending.wait().expect("completed").is_error());
}

#[rstest]
fn synchronous_submissions_are_ready(pool: SandboxManager) {
    let pending = pool.submit(HostCall::new(descriptor("warden/Runtime::tick()")));

    assert!(matches!(pending, PendingCall::Ready(Ok(_))));
}

// ---------------------------------------------------------------------------
// Taint
// ---------------------------------------------------------------------------

#[rstest]
fn tainted_sandboxes_are_avoided_by_untainted_calls(pool: SandboxManager) {
    taint_sandbox(&pool, 0);

    let (sandbox, _) = tick(&pool, HostCall::new(descriptor("warden/Runtime::tick()")));

    assert_eq!(sandbox, 1);
    assert!(pool.sandbox_taint(0).expect("slot").is_tainted_with(&label(SECRET)));
    assert!(pool.sandbox_taint(1).expect("slot").is_empty());
}

#[rstest]
fn tainted_calls_may_join_a_tainted_sandbox(pool: SandboxManager) {
    taint_sandbox(&pool, 0);

    let (sandbox, _) = tick(
        &pool,
        HostCall::new(descriptor("warden/Runtime::tick()"))
            .taint(&TaintSet::singleton(label(SECRET))),
    );

    assert_eq!(sandbox, 0);
}

#[rstest]
fn a_full_pool_recycles_its_least_tainted_sandbox() {
    let pool = pool_of(1);
    let tick_call = || HostCall::new(descriptor("warden/Runtime::tick()"));
    assert_eq!(tick(&pool, tick_call()), (0, 1));
    taint_sandbox(&pool, 0);

    assert_eq!(tick(&pool, tick_call()), (0, 1));
    assert!(pool.sandbox_taint(0).expect("slot").is_empty());
}

#[rstest]
fn policy_denials_surface_as_exceptions(pool: SandboxManager) {
    taint_sandbox(&pool, 0);

    let result = pool
        .call(
            HostCall::new(descriptor("warden/Notify::toast(string)"))
                .arg(text("leak"))
                .flags(CallFlags::empty().with_sandbox(0)),
        )
        .expect("call");

    let exception = result.throwable().expect("denied");
    assert!(exception.is_kind(kinds::SECURITY));
}

#[rstest]
fn allowed_toasts_reach_the_notifier() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_toast()
        .withf(|package, text| package == "warden" && text == "hi")
        .times(1)
        .returning(|_, _| Ok(()));
    let pool = pool_with(
        1,
        TrustedServices::new(manifests(), "https://push.example/").with_notifier(Arc::new(notifier)),
    );

    let result = pool
        .call(HostCall::new(descriptor("warden/Notify::toast(string)")).arg(text("hi")))
        .expect("call");

    assert!(!result.is_error());
}

#[rstest]
fn stored_values_come_back(pool: SandboxManager) {
    pool.call(
        HostCall::new(descriptor("warden/Vault::store(string,string)"))
            .arg(text("k"))
            .arg(text("v")),
    )
    .expect("store");

    let result = pool
        .call(HostCall::new(descriptor("warden/Vault::load(string)")).arg(text("k")))
        .expect("load");
    let value = result.return_value().expect("completed").expect("value").clone();

    assert_eq!(pool.read::<String>(&value).expect("read"), Some(String::from("v")));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[rstest]
fn fired_events_reach_subscribers() {
    let pool = pool_of(1);
    pool.call(HostCall::new(descriptor("warden/Events::listen(string)")).arg(text("warden/news")))
        .expect("listen");

    pool.call(
        HostCall::new(descriptor("warden/Events::fire(string,string)"))
            .arg(text("warden/news"))
            .arg(text("hello")),
    )
    .expect("fire");
    pool.flush_deliveries();

    let result = pool
        .call(HostCall::new(descriptor("warden/Events::received()")))
        .expect("received");
    let received = result.return_value().expect("completed").expect("value").clone();
    assert_eq!(
        pool.read::<Vec<String>>(&received).expect("read"),
        Some(vec![String::from("hello")])
    );
}

#[rstest]
fn host_events_reach_subscribers() {
    let pool = pool_of(1);
    pool.call(HostCall::new(descriptor("warden/Events::listen(string)")).arg(text("warden/alerts")))
        .expect("listen");

    let reached = pool.fire_event(
        &TaintSet::empty(),
        &label("warden/alerts"),
        vec![ParceledPayload::encode(&String::from("ping")).expect("encode")],
    );
    pool.flush_deliveries();

    assert_eq!(reached, 1);
    let result = pool
        .call(HostCall::new(descriptor("warden/Events::received()")))
        .expect("received");
    let received = result.return_value().expect("completed").expect("value").clone();
    assert_eq!(
        pool.read::<Vec<String>>(&received).expect("read"),
        Some(vec![String::from("ping")])
    );
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[rstest]
fn status_reports_lazy_start(pool: SandboxManager) {
    assert_eq!(pool.status(0).expect("status"), WorkerState::Unbound);

    pool.pid(0).expect("pid");

    assert_eq!(pool.status(0).expect("status"), WorkerState::Ready);
}

#[rstest]
fn killed_sandboxes_invalidate_their_handles(pool: SandboxManager) {
    let buffer = new_buffer(&pool, 0, "doomed");

    assert!(pool.kill(0).expect("kill"));
    assert!(!pool.kill(0).expect("kill"));

    assert!(matches!(pool.read::<Buffer>(&buffer), Err(HostError::StaleHandle { .. })));
    let error = pool
        .call(HostCall::new(descriptor("warden/Buffer#contents()")).arg(HostArg::handle(buffer)))
        .expect_err("stale");
    assert!(matches!(error, HostError::StaleHandle { .. }));
}

#[rstest]
fn forced_collection_keeps_the_sandbox_usable(pool: SandboxManager) {
    let tick_call = || HostCall::new(descriptor("warden/Runtime::tick()"));
    tick(&pool, tick_call());

    pool.force_gc(0).expect("gc");

    assert_eq!(tick(&pool, tick_call()), (0, 2));
}

#[rstest]
fn resolution_reports_details(pool: SandboxManager) {
    let details = pool
        .resolve(0, &descriptor("warden/Runtime::tick()"), false, true)
        .expect("resolve")
        .expect("details");

    assert_eq!(details.result_type.as_deref(), Some("long"));
}

#[rstest]
fn failed_resolution_is_rejected(pool: SandboxManager) {
    let error = pool
        .resolve(0, &descriptor("warden/Runtime::missing()"), false, false)
        .expect_err("missing");

    assert!(matches!(error, HostError::Rejected { request: "resolve", .. }));
}

#[rstest]
fn indices_outside_the_pool_are_refused(pool: SandboxManager) {
    assert!(matches!(
        pool.pid(5),
        Err(HostError::NoSuchSandbox { index: 5, pool_size: 2 })
    ));
}

#[rstest]
fn launch_failures_are_reported() {
    let mut launcher = MockWorkerLauncher::new();
    launcher.expect_launch().returning(|_| Err(ChannelError::Closed));
    let mut reporter = MockHealthReporter::new();
    reporter
        .expect_sandbox_event()
        .withf(|index, event| *index == 0 && *event == SandboxEvent::Launching)
        .times(1)
        .return_const(());
    reporter
        .expect_sandbox_failed()
        .withf(|index, error| *index == 0 && matches!(error, HostError::Launch { .. }))
        .times(1)
        .return_const(());
    let pool = SandboxManager::new(
        PoolSettings::new(1),
        Arc::new(launcher),
        TrustedServices::new(manifests(), "https://push.example/"),
        Arc::new(reporter),
    );

    let error = pool.pid(0).expect_err("launch");

    assert!(matches!(error, HostError::Launch { index: 0, .. }));
}
