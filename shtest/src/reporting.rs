use std::io::Write;
use std::time::Duration;

use colored::Colorize;
use shtest_core::{ResultCode, TestCase};
use strum::IntoEnumIterator;

/// Options controlling what is reported while and after tests run.
#[derive(Clone, Copy, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ReportOptions {
    /// Show the output of failing tests.
    pub verbose: bool,
    /// Show the output of every test.
    pub show_all: bool,
    /// Suppress per-test progress lines.
    pub quiet: bool,
    /// List unsupported tests in the summary.
    pub show_unsupported: bool,
    /// List expected failures in the summary.
    pub show_xfail: bool,
}

/// Reports progress as tests finish.
pub struct Reporter {
    options: ReportOptions,
    total: usize,
    completed: usize,
}

impl Reporter {
    pub const fn new(options: ReportOptions, total: usize) -> Self {
        Self {
            options,
            total,
            completed: 0,
        }
    }

    /// Reports a finished test.
    pub fn test_finished<W: Write>(&mut self, writer: &mut W, test: &TestCase) -> std::io::Result<()> {
        self.completed += 1;

        let Some(result) = test.result() else {
            return Ok(());
        };

        let show_output =
            self.options.show_all || (self.options.verbose && result.code.is_failure());

        if self.options.quiet && !result.code.is_failure() {
            return Ok(());
        }

        writeln!(
            writer,
            "{}: {} ({} of {})",
            colorize_code(result.code),
            test.full_name(),
            self.completed,
            self.total
        )?;

        if show_output {
            let banner = "*".repeat(20);
            writeln!(writer, "{banner} TEST '{}' {banner}", test.full_name())?;
            write!(writer, "{}", result.output)?;
            if !result.output.ends_with('\n') && !result.output.is_empty() {
                writeln!(writer)?;
            }

            for (name, value) in result.metrics() {
                writeln!(writer, "{name}: {value}")?;
            }

            writeln!(writer, "{}", "*".repeat(10))?;
        }

        Ok(())
    }
}

fn colorize_code(code: ResultCode) -> colored::ColoredString {
    let text = code.to_string();
    match code {
        ResultCode::Pass | ResultCode::Xfail => text.bright_green(),
        ResultCode::FlakyPass => text.green(),
        ResultCode::Unsupported => text.bright_magenta(),
        ResultCode::Fail | ResultCode::Xpass | ResultCode::Unresolved | ResultCode::Timeout => {
            text.bright_red()
        }
    }
}

/// Writes the end-of-run summary: the tests in each noteworthy category, the elapsed time,
/// and the number of tests with each outcome.
///
/// # Arguments
///
/// * `writer` - Where to write the summary.
/// * `tests` - The tests of the run, in the order they were submitted.
/// * `options` - Reporting options.
/// * `elapsed` - Wall-clock time the run took.
pub fn write_summary<W: Write>(
    writer: &mut W,
    tests: &[TestCase],
    options: &ReportOptions,
    elapsed: Duration,
) -> std::io::Result<()> {
    let code_of = |test: &TestCase| test.result().map(|r| r.code);

    for code in ResultCode::iter() {
        let listed = code.is_failure()
            || (code == ResultCode::Unsupported && options.show_unsupported)
            || (code == ResultCode::Xfail && options.show_xfail);

        if !listed {
            continue;
        }

        let matching: Vec<_> = tests.iter().filter(|t| code_of(t) == Some(code)).collect();
        if matching.is_empty() {
            continue;
        }

        writeln!(writer, "{} Tests ({}):", code.label(), matching.len())?;
        for test in matching {
            writeln!(writer, "  {}", test.full_name())?;
        }
        writeln!(writer)?;
    }

    writeln!(writer, "Testing Time: {:.2}s", elapsed.as_secs_f64())?;
    writeln!(writer)?;
    writeln!(writer, "Total Discovered Tests: {}", tests.len())?;

    let width = ResultCode::iter().map(|c| c.label().len()).max().unwrap_or(0);

    for code in ResultCode::iter() {
        let count = tests.iter().filter(|t| code_of(t) == Some(code)).count();
        if count == 0 {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let pct = count as f64 * 100.0 / tests.len() as f64;
        writeln!(
            writer,
            "  {:<width$}: {count} ({pct:.2}%)",
            code.label(),
        )?;
    }

    Ok(())
}

/// Returns whether any test in the run failed.
pub fn has_failures(tests: &[TestCase]) -> bool {
    tests
        .iter()
        .any(|t| t.result().is_some_and(|r| r.code.is_failure()))
}
