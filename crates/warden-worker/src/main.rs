//! Entry point for the `warden-worker` binary.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use warden_config::{DEFAULT_LOG_FILTER, LogFormat};
use warden_worker::telemetry::{self, TelemetryError};
use warden_worker::{WorkerError, launch};

const MAIN_TARGET: &str = "warden_worker::main";

/// Sandboxed executor for quarantined application code.
#[derive(Debug, Parser)]
#[command(name = "warden-worker", version)]
struct WorkerArgs {
    /// Re-launch inside a confining sandbox before serving.
    #[arg(long)]
    sandboxed: bool,

    /// Tracing filter expression.
    #[arg(long, env = "WARDEN_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    /// Log output: json or compact.
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value_t = LogFormat::default())]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = WorkerArgs::parse();
    if let Err(error) = telemetry::initialise(&args.log_filter, args.log_format) {
        report_without_telemetry(&error);
        return ExitCode::FAILURE;
    }
    match run(&args) {
        Ok(code) => code,
        Err(failure) => {
            error!(target: MAIN_TARGET, error = %failure, "worker failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &WorkerArgs) -> Result<ExitCode, WorkerError> {
    if args.sandboxed {
        let status = launch::run_sandboxed()?;
        let code = status
            .code()
            .and_then(|raw| u8::try_from(raw).ok())
            .unwrap_or(1);
        return Ok(ExitCode::from(code));
    }
    launch::serve_stdio()?;
    Ok(ExitCode::SUCCESS)
}

#[expect(clippy::print_stderr, reason = "no subscriber is installed yet")]
fn report_without_telemetry(error: &TelemetryError) {
    eprintln!("warden-worker: {error}");
}
