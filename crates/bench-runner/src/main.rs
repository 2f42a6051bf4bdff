//! CLI entry point for the string/memory benchmark matrix.

mod cli;
mod logging;

use bench_core::{EmulatorInstall, Matrix, MatrixConfig, PhaseTally, ResultIndex, SetupError};
use clap::Parser;
#[cfg(test)]
use tempfile as _;

use cli::Cli;

/// Exit code for configuration and setup failures.
const EXIT_SETUP: i32 = 1;
/// Exit code when logging cannot be started.
const EXIT_LOGGING: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Summary {
    built: PhaseTally,
    ran: PhaseTally,
    exported: PhaseTally,
}

fn run_matrix(cli: &Cli, config: MatrixConfig) -> Result<Summary, SetupError> {
    let build_root = cli.emulator_build_dir();
    let install_root = cli.emulator_install_dir();
    let mut matrix = Matrix::new(config, |build| {
        EmulatorInstall::locate(build, &build_root, &install_root)
    })?;

    tracing::info!("building {} configurations", matrix.units().len());
    let built = matrix.build()?;
    tracing::info!(
        successes = built.successes,
        failures = built.failures,
        "build phase complete"
    );

    tracing::info!("running {} configurations", built.successes);
    let ran = matrix.run()?;
    tracing::info!(
        successes = ran.successes,
        failures = ran.failures,
        "run phase complete"
    );

    let exported = matrix.export();
    tracing::info!(files = exported.successes, "results exported");
    Ok(Summary {
        built,
        ran,
        exported,
    })
}

fn print_summary(summary: &Summary) {
    println!(
        "Built {}/{}, ran {}/{}, exported {}/{}",
        summary.built.successes,
        summary.built.total(),
        summary.ran.successes,
        summary.ran.total(),
        summary.exported.successes,
        summary.exported.total()
    );
}

fn print_report(config: &MatrixConfig) {
    let index = ResultIndex::for_config(config);
    println!("Results in {}", config.results_dir.display());
    println!(
        "Found {} of {} result files",
        index.found().count(),
        index.len()
    );
    for identity in index.missing() {
        println!("  missing: {identity}");
    }
    let complete: Vec<String> = index
        .complete_benchmarks()
        .iter()
        .map(ToString::to_string)
        .collect();
    if complete.is_empty() {
        println!("No benchmark has a complete set of results");
    } else {
        println!("Complete benchmarks: {}", complete.join(" "));
    }
}

fn run(cli: &Cli) -> i32 {
    let datestamp = cli.datestamp.clone().unwrap_or_else(cli::datestamp_now);
    let log_file = cli.log_file(&datestamp);
    if let Err(err) = logging::init(&log_file, cli.log_level.as_deref()) {
        eprintln!("error: {err}");
        return EXIT_LOGGING;
    }

    let config = cli.matrix_config(&datestamp);
    tracing::debug!(log_file = %log_file.display(), "logging started");
    tracing::debug!("settings: {config:#?}");

    if cli.report_only {
        if let Err(err) = config.validate() {
            tracing::error!("{err}");
            return EXIT_SETUP;
        }
    } else {
        match run_matrix(cli, config.clone()) {
            Ok(summary) => print_summary(&summary),
            Err(err) => {
                tracing::error!("{err}");
                return EXIT_SETUP;
            }
        }
    }

    print_report(&config);
    0
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(&cli));
}
