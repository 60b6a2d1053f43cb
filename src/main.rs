//! fsperf CLI entry point

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use fsperf::config::cli::PerfCli;
use fsperf::output::{json, text};
use fsperf::storage::posix::PosixStorage;
use fsperf::util::logging::init_logging;
use fsperf::worker::run_perf;
use fsperf::{ErrorClass, HarnessError, PerfConfig, Result};
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    let cli = match PerfCli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("warning: {:#}", e);
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run(config: &PerfConfig) -> Result<()> {
    println!("fsperf v{}", env!("CARGO_PKG_VERSION"));
    println!(" {}", config);

    let report = run_perf(config, |core_id| PosixStorage::for_core(&config.dir, core_id))?;
    text::print_perf_report(&report).context("failed to print report")?;

    if let Some(path) = &config.json {
        json::write_json_output(path, &json::perf_to_json(&report), true)?;
        info!(path = %path.display(), "JSON report written");
    }
    Ok(())
}

/// Report a fatal error; argument errors come with the usage text
fn fail(err: &anyhow::Error) -> ExitCode {
    eprintln!("error: {:#}", err);
    if HarnessError::classify(err) == ErrorClass::Argument {
        eprintln!();
        eprintln!("{}", PerfCli::usage());
    }
    ExitCode::FAILURE
}
