//! Implements the command-line interface for the `shtest` test runner.

#![deny(missing_docs)]

mod args;
mod events;
mod reporting;

use std::io::Write;

use clap::Parser;
use shtest_core::{Discovery, Error, FormatRegistry, Run};

use crate::args::CommandLineArgs;
use crate::reporting::{ReportOptions, Reporter};

/// Exit code for a run in which no test failed.
const EXIT_SUCCESS: i32 = 0;
/// Exit code for a run in which a test failed, or that hit its time limit.
const EXIT_TESTS_FAILED: i32 = 1;
/// Exit code for a run in which tests could not be discovered.
const EXIT_DISCOVERY_FAILED: i32 = 2;

/// Main entry point for the `shtest` test runner.
fn main() {
    //
    // Set up panic handler. On release builds, it will capture panic details to a
    // temporary .toml file and report a human-readable message to the screen.
    //
    human_panic::setup_panic!(
        human_panic::Metadata::new(env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"))
            .authors(env!("CARGO_PKG_AUTHORS"))
    );

    let parsed_args = CommandLineArgs::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            std::process::exit(EXIT_TESTS_FAILED);
        }
    };

    let exit_code = match runtime.block_on(run(parsed_args)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("error: {:#}", e);
            EXIT_TESTS_FAILED
        }
    };

    std::process::exit(exit_code);
}

/// Discovers and runs tests. Returns the exit code.
///
/// # Arguments
///
/// * `args` - The parsed command-line arguments.
#[doc(hidden)]
async fn run(args: CommandLineArgs) -> anyhow::Result<i32> {
    events::init(&args.enabled_trace_events, args.quiet);

    let filter = args
        .filter
        .as_deref()
        .map(regex::Regex::new)
        .transpose()?;

    let runner = args.runner_config();
    let mut discovery = Discovery::new(runner.clone(), FormatRegistry::standard());

    let mut tests = match discovery.find_tests_for_inputs(args.inputs.as_slice()) {
        Ok(tests) => tests,
        Err(Error::DiscoveryFailed(count)) => {
            tracing::error!("{count} errors found during test discovery; exiting");
            return Ok(EXIT_DISCOVERY_FAILED);
        }
        Err(e) => return Err(e.into()),
    };

    if tests.is_empty() {
        tracing::error!("did not discover any tests for the provided path(s)");
        return Ok(EXIT_DISCOVERY_FAILED);
    }

    let discovered = tests.len();
    if let Some(filter) = &filter {
        tests.retain(|test| filter.is_match(&test.full_name()));
        if tests.is_empty() {
            tracing::error!("filter did not match any tests (of {discovered} discovered)");
            return Ok(EXIT_DISCOVERY_FAILED);
        }
    }

    shtest_core::order_tests(&mut tests, args.order.into());

    let options = ReportOptions {
        verbose: args.verbose,
        show_all: args.show_all,
        quiet: args.quiet,
        show_unsupported: args.show_unsupported,
        show_xfail: args.show_xfail,
    };

    if !args.quiet {
        println!(
            "-- Testing: {} tests, {} workers --",
            tests.len(),
            runner.jobs.min(tests.len())
        );
    }

    let start = std::time::Instant::now();
    let mut reporter = Reporter::new(options, tests.len());
    let mut run = Run::new(tests, runner);

    let outcome = run
        .execute(|_, test| {
            if let Err(e) = reporter.test_finished(&mut std::io::stdout().lock(), test) {
                tracing::warn!("failed to report test result: {e}");
            }
        })
        .await;

    let elapsed = start.elapsed();

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout)?;
    reporting::write_summary(&mut stdout, run.tests(), &options, elapsed)?;
    stdout.flush()?;

    match outcome {
        Err(Error::DeadlineExceeded(limit)) => {
            tracing::warn!("reached the time limit of {}s; stopped the run", limit.as_secs());
            Ok(EXIT_TESTS_FAILED)
        }
        Err(e) => Err(e.into()),
        Ok(()) if reporting::has_failures(run.tests()) => Ok(EXIT_TESTS_FAILED),
        Ok(()) => Ok(EXIT_SUCCESS),
    }
}
