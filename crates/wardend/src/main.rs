//! Entry point for the `wardend` binary.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};
use warden_config::ConfigError;
use wardend::{BootstrapError, ShutdownSignal, SystemShutdownSignal, bootstrap};

const MAIN_TARGET: &str = "wardend::main";

fn main() -> ExitCode {
    let daemon = match bootstrap() {
        Ok(daemon) => daemon,
        Err(BootstrapError::Configuration { source }) => return report_configuration(&source),
        Err(failure) => {
            report_without_telemetry(&failure);
            return ExitCode::FAILURE;
        }
    };
    info!(
        target: MAIN_TARGET,
        pool_size = daemon.manager().pool_size(),
        "wardend ready"
    );

    let signal = SystemShutdownSignal::new(daemon.config().kill_grace_period());
    let waited = signal.wait().context("waiting for a shutdown signal");
    daemon.shutdown();
    match waited {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(target: MAIN_TARGET, error = format!("{failure:#}"), "wardend failed");
            ExitCode::FAILURE
        }
    }
}

fn report_configuration(error: &ConfigError) -> ExitCode {
    if let Some(cli) = error.cli_error() {
        cli.exit();
    }
    report_without_telemetry(error);
    ExitCode::FAILURE
}

#[expect(clippy::print_stderr, reason = "no subscriber is installed yet")]
fn report_without_telemetry(error: &dyn std::error::Error) {
    eprintln!("wardend: {error}");
}
