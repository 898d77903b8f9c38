//! Core implementation of the shtest test-orchestration engine. Implements suite discovery,
//! configuration inheritance, test-script directives, an internal shell interpreter with
//! built-in commands, and a concurrent dispatcher.

pub mod builtins;
pub mod config;
pub mod directives;
pub mod discovery;
pub mod dispatch;
mod error;
pub mod formats;
mod interp;
mod processes;
pub mod results;
mod runner;
pub mod substitutions;
mod trace_categories;

pub use config::{ConfigFile, RunnerConfig, TestingConfig};
pub use discovery::Discovery;
pub use dispatch::{Run, TestOrder, order_tests};
pub use error::Error;
pub use formats::{FormatRegistry, TestFormat};
pub use interp::{CommandResult, ShellEnvironment, ShellExecutor};
pub use results::{MetricValue, ResultCode, TestResult};
pub use runner::execute_test;
pub use test::{TestCase, TestSuite};
