use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, builder::styling};
use shtest_core::{RunnerConfig, TestOrder};

use crate::events;

const SHORT_DESCRIPTION: &str = "Discovers and runs shell-scripted test suites";

const LONG_DESCRIPTION: &str = r"
shtest discovers tests under the given paths, runs the commands embedded in each test's
RUN: lines, and reports the results.

Exits with status 0 when every test passed, 1 when any test failed, and 2 when tests could not
be discovered.
";

/// Order in which tests are started.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Order {
    /// The order in which tests were discovered.
    Discovery,
    /// Early tests first, then by name.
    Lexical,
    /// A random order.
    Random,
}

impl From<Order> for TestOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Discovery => Self::Discovery,
            Order::Lexical => Self::Lexical,
            Order::Random => Self::Random,
        }
    }
}

/// Parsed command-line arguments for shtest.
#[derive(Parser)]
#[clap(name = "shtest",
       version,
       about = SHORT_DESCRIPTION,
       long_about = LONG_DESCRIPTION,
       styles = help_styles())]
#[allow(clippy::struct_excessive_bools)]
pub struct CommandLineArgs {
    /// Tests or directories to search for tests; `@FILE` reads inputs from a file.
    #[clap(required = true, value_name = "PATH")]
    pub inputs: Vec<String>,

    /// Number of tests to run concurrently.
    #[clap(short = 'j', long = "workers", alias = "threads", value_name = "N")]
    pub workers: Option<usize>,

    /// Stop after this many failures.
    #[clap(long = "max-failures", value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_failures: Option<u32>,

    /// Time limit for each test, in seconds.
    #[clap(long = "timeout", value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Time limit for the whole run, in seconds.
    #[clap(long = "max-time", value_name = "SECONDS")]
    pub max_time: Option<u64>,

    /// Report runnable tests as passing without running them.
    #[clap(long = "no-execute")]
    pub no_execute: bool,

    /// Run shell tests in an external shell rather than the internal one.
    #[clap(long = "external-shell")]
    pub external_shell: bool,

    /// Trace every command run by the external shell.
    #[clap(long = "echo-all-commands")]
    pub echo_all_commands: bool,

    /// Only run tests whose full names match this regular expression.
    #[clap(long = "filter", env = "SHTEST_FILTER", value_name = "REGEX")]
    pub filter: Option<String>,

    /// Order in which tests are started.
    #[clap(long = "order", value_enum, default_value = "discovery")]
    pub order: Order,

    /// Number of retries for every failing test, overriding suite configuration.
    #[clap(long = "max-retries-per-test", value_name = "N")]
    pub max_retries_per_test: Option<u32>,

    /// Free-form parameter made available to suites.
    #[clap(short = 'D', long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Directory to search for commands ahead of the host's PATH.
    #[clap(long = "path", value_name = "DIR")]
    pub path: Vec<PathBuf>,

    /// Prefix of configuration file names.
    #[clap(long = "config-prefix", value_name = "PREFIX")]
    pub config_prefix: Option<String>,

    /// Show the output of failing tests.
    #[clap(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Show the output of every test.
    #[clap(short = 'a', long = "show-all")]
    pub show_all: bool,

    /// Only show the summary.
    #[clap(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// List unsupported tests in the summary.
    #[clap(long = "show-unsupported")]
    pub show_unsupported: bool,

    /// List expectedly failing tests in the summary.
    #[clap(long = "show-xfail")]
    pub show_xfail: bool,

    /// Enable debug logging for classes of tracing events.
    #[clap(long = "trace", value_name = "EVENT")]
    pub enabled_trace_events: Vec<events::TraceEvent>,
}

impl CommandLineArgs {
    /// Returns the run options selected by the arguments.
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::default()
            .with_max_failures(self.max_failures.map(|n| n as usize))
            .with_timeout(self.timeout.map(Duration::from_secs))
            .with_max_time(self.max_time.map(Duration::from_secs))
            .with_no_execute(self.no_execute)
            .with_external_shell(self.external_shell)
            .with_echo_all_commands(self.echo_all_commands)
            .with_max_retries_per_test(self.max_retries_per_test);

        if let Some(workers) = self.workers {
            config = config.with_jobs(workers);
        }

        if let Some(prefix) = &self.config_prefix {
            config = config.with_config_prefix(prefix.as_str());
        }

        for param in &self.params {
            let (name, value) = param.split_once('=').unwrap_or((param.as_str(), ""));
            config = config.with_param(name, value);
        }

        config.path.clone_from(&self.path);
        config
    }
}

/// Returns clap styling to be used for command-line help.
#[doc(hidden)]
fn help_styles() -> clap::builder::Styles {
    styling::Styles::styled()
        .header(
            styling::AnsiColor::Yellow.on_default()
                | styling::Effects::BOLD
                | styling::Effects::UNDERLINE,
        )
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Magenta.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}
