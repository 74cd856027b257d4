//! Behavioural tests for configuration layering.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use warden_config::{
    Config, DEFAULT_POOL_SIZE, LaunchMode, default_log_filter, default_log_format,
};

static ENV_MUTEX: Mutex<()> = Mutex::new(());

const POOL_SIZE_VAR: &str = "WARDEN_POOL_SIZE";

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_lock: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_lock = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let harness = Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("wardend")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_lock: env_lock,
        };
        harness.clear_env(POOL_SIZE_VAR);
        harness.clear_env("WARDEN_CONFIG_PATH");
        harness
    }

    fn write_config(&self, toml: &str) {
        let path = self.temp_dir.path().join("wardend.toml");
        if let Err(error) = fs::write(&path, toml) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn remember(&self, key: &str) {
        let previous = std::env::var_os(key);
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn set_env(&self, key: &str, value: &str) {
        self.remember(key);
        // SAFETY: `ENV_MUTEX` serialises every scenario touching the environment.
        unsafe { std::env::set_var(key, value) };
    }

    fn clear_env(&self, key: &str) {
        self.remember(key);
        // SAFETY: as above.
        unsafe { std::env::remove_var(key) };
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::resolve_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn loaded(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        self.loaded
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("configuration was not loaded"))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the pool size to {size}")]
fn given_configuration_file(harness: &Harness, size: String) {
    harness.write_config(&format!("pool_size = {}\n", size.trim_matches('"')));
}

#[given("the environment overrides the pool size to {size}")]
fn given_environment_override(harness: &Harness, size: String) {
    harness.set_env(POOL_SIZE_VAR, size.trim_matches('"'));
}

#[when("the command line sets the pool size to {size}")]
fn when_cli_override(harness: &Harness, size: String) {
    harness.push_cli_arg("--pool-size");
    harness.push_cli_arg(size.trim_matches('"'));
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the pool size to {size}")]
fn then_resolved_pool_size(harness: &Harness, size: String) {
    let expected: usize = size
        .trim_matches('"')
        .parse()
        .unwrap_or_else(|error| panic!("invalid expected size '{size}': {error}"));
    assert_eq!(harness.loaded().pool_size(), expected);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.loaded();
    assert_eq!(config.pool_size(), DEFAULT_POOL_SIZE);
    assert_eq!(config.launch_mode(), LaunchMode::Sandboxed);
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
