//! Unit tests for package contexts.

use std::sync::Arc;

use rstest::{fixture, rstest};
use warden_core::{CallDescriptor, ComponentName, kinds};

use super::*;
use crate::registry::{CallSpec, ModuleRegistry, PackageModule};

const APP: &str = "com.example.app";

fn app_call() -> CallDescriptor {
    CallDescriptor::static_method(
        ComponentName::new(APP, "Main").expect("valid"),
        "run",
        Vec::<String>::new(),
    )
    .expect("valid")
}

#[fixture]
fn cache() -> ContextCache {
    let module = PackageModule::new(APP)
        .with_call(CallSpec::new(app_call(), |_| Ok(None)))
        .expect("register");
    let registry = ModuleRegistry::with_builtins()
        .and_then(|registry| registry.with_module(module))
        .expect("registry");
    ContextCache::new(Arc::new(registry))
}

#[rstest]
fn contexts_are_created_once(cache: ContextCache) {
    assert!(cache.packages().is_empty());
    let first = cache.context(APP).expect("context");
    let second = cache.context(APP).expect("context");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.packages(), vec![builtin::PACKAGE.to_owned(), APP.to_owned()]);
}

#[rstest]
fn unknown_packages_are_reported(cache: ContextCache) {
    let error = cache.context("com.missing").expect_err("unknown");
    assert!(error.is_kind(kinds::NO_SUCH_PACKAGE));
    assert!(cache.packages().is_empty());
}

#[rstest]
fn lookups_fall_back_to_the_builtin_context(cache: ContextCache) {
    let context = cache.context(APP).expect("context");
    assert!(context.lookup(&app_call(), false).is_some());
    assert!(context.lookup(&builtin::noop_descriptor().expect("noop descriptor"), false).is_some());

    let root = cache.context(builtin::PACKAGE).expect("builtin context");
    assert!(root.lookup(&app_call(), false).is_none());
}

#[rstest]
fn package_state_persists_per_context(cache: ContextCache) {
    let app = cache.context(APP).expect("context");
    let root = cache.context(builtin::PACKAGE).expect("builtin context");
    app.with_state(|count: &mut u32| *count += 2);
    app.with_state(|count: &mut u32| *count += 1);
    assert_eq!(app.with_state(|count: &mut u32| *count), 3);
    assert_eq!(root.with_state(|count: &mut u32| *count), 0);
}
