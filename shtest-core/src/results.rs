//! Test outcomes, metrics, and per-test results.

use std::time::Duration;

use indexmap::IndexMap;

use crate::error;

/// The outcome category of a test.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ResultCode {
    /// The test passed.
    Pass,
    /// The test passed, but only after being retried.
    FlakyPass,
    /// The test failed, and was expected to.
    Xfail,
    /// The test failed.
    Fail,
    /// The test passed, but was expected to fail.
    Xpass,
    /// The test couldn't be run to a conclusive outcome.
    Unresolved,
    /// The test isn't supported in this configuration.
    Unsupported,
    /// The test exceeded its time limit.
    Timeout,
}

impl ResultCode {
    /// Returns whether this outcome counts as a failure of the run.
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Fail | Self::Xpass | Self::Unresolved | Self::Timeout
        )
    }

    /// Returns a human-readable label used when summarizing a run.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "Passed",
            Self::FlakyPass => "Passed With Retry",
            Self::Xfail => "Expectedly Failed",
            Self::Fail => "Failed",
            Self::Xpass => "Unexpectedly Passed",
            Self::Unresolved => "Unresolved",
            Self::Unsupported => "Unsupported",
            Self::Timeout => "Timed Out",
        }
    }
}

/// A named measurement attached to a test result.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// An integral measurement.
    Integer(i64),
    /// A real-valued measurement.
    Real(f64),
    /// A free-form textual measurement.
    Text(String),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value:.4}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// The result of running a single test.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The outcome.
    pub code: ResultCode,
    /// Output captured while running the test.
    pub output: String,
    /// How long the test took to run, if it was run.
    pub elapsed: Option<Duration>,
    metrics: IndexMap<String, MetricValue>,
    micro_results: IndexMap<String, TestResult>,
}

impl TestResult {
    /// Returns a new result with the given outcome and output.
    ///
    /// # Arguments
    ///
    /// * `code` - The outcome.
    /// * `output` - Output to associate with the result.
    pub fn new<S: Into<String>>(code: ResultCode, output: S) -> Self {
        Self {
            code,
            output: output.into(),
            elapsed: None,
            metrics: IndexMap::new(),
            micro_results: IndexMap::new(),
        }
    }

    /// Attaches a named metric to the result.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the metric; must not already be present.
    /// * `value` - The measured value.
    pub fn add_metric<S: Into<String>>(
        &mut self,
        name: S,
        value: MetricValue,
    ) -> Result<(), error::Error> {
        let name = name.into();
        if self.metrics.contains_key(&name) {
            return Err(error::Error::DuplicateMetric(name));
        }

        self.metrics.insert(name, value);
        Ok(())
    }

    /// Attaches a named sub-result to the result.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the sub-result; must not already be present.
    /// * `result` - The sub-result.
    pub fn add_micro_result<S: Into<String>>(
        &mut self,
        name: S,
        result: Self,
    ) -> Result<(), error::Error> {
        let name = name.into();
        if self.micro_results.contains_key(&name) {
            return Err(error::Error::DuplicateMicroResult(name));
        }

        self.micro_results.insert(name, result);
        Ok(())
    }

    /// Returns the metrics attached to the result, in insertion order.
    pub const fn metrics(&self) -> &IndexMap<String, MetricValue> {
        &self.metrics
    }

    /// Returns the sub-results attached to the result, in insertion order.
    pub const fn micro_results(&self) -> &IndexMap<String, Self> {
        &self.micro_results
    }
}
