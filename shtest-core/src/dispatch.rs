//! Dispatching tests to a bounded pool of workers.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RunnerConfig;
use crate::results::{ResultCode, TestResult};
use crate::test::TestCase;
use crate::{error, runner, trace_categories};

/// Order in which tests are started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TestOrder {
    /// The order in which tests were discovered.
    #[default]
    Discovery,
    /// Early tests first, then by full name.
    Lexical,
    /// A random order.
    Random,
}

/// Reorders tests before a run.
///
/// # Arguments
///
/// * `tests` - The tests to reorder.
/// * `order` - The order to apply.
pub fn order_tests(tests: &mut [TestCase], order: TestOrder) {
    match order {
        TestOrder::Discovery => (),
        TestOrder::Lexical => tests.sort_by_cached_key(|t| (!t.is_early(), t.full_name())),
        TestOrder::Random => tests.shuffle(&mut rand::rng()),
    }
}

/// A run over a list of tests. Results are recorded on the tests themselves, which stay in
/// the order they were given regardless of the order in which they finish.
pub struct Run {
    tests: Vec<TestCase>,
    runner: Arc<RunnerConfig>,
    failures: usize,
}

impl Run {
    /// Returns a new run.
    ///
    /// # Arguments
    ///
    /// * `tests` - The tests to run.
    /// * `runner` - The run's global options.
    pub fn new(tests: Vec<TestCase>, runner: RunnerConfig) -> Self {
        Self {
            tests,
            runner: Arc::new(runner),
            failures: 0,
        }
    }

    /// Returns the run's tests.
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Consumes the run, returning its tests.
    pub fn into_tests(self) -> Vec<TestCase> {
        self.tests
    }

    /// Returns the number of tests that failed.
    pub const fn failures(&self) -> usize {
        self.failures
    }

    /// Executes the run. Once the configured number of failures is reached, no further tests
    /// are started and those still running are stopped. Tests that never finished are
    /// recorded as unresolved. Reaching the overall time limit stops the run with an error.
    ///
    /// # Arguments
    ///
    /// * `on_finished` - Called with each test's index as the test finishes.
    pub async fn execute<F>(&mut self, mut on_finished: F) -> Result<(), error::Error>
    where
        F: FnMut(usize, &TestCase),
    {
        let deadline = self
            .runner
            .max_time
            .map(|t| tokio::time::Instant::now() + t);

        let outcome = if self.runner.jobs <= 1 {
            self.execute_serially(deadline, &mut on_finished).await
        } else {
            self.execute_in_pool(deadline, &mut on_finished).await
        };

        self.mark_unfinished()?;
        outcome
    }

    async fn execute_serially<F>(
        &mut self,
        deadline: Option<tokio::time::Instant>,
        on_finished: &mut F,
    ) -> Result<(), error::Error>
    where
        F: FnMut(usize, &TestCase),
    {
        for index in 0..self.tests.len() {
            let runner = Arc::clone(&self.runner);
            let test = &mut self.tests[index];

            match deadline {
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, runner::execute_test(test, &runner))
                        .await
                        .map_err(|_| self.deadline_error())??;
                }
                None => runner::execute_test(test, &runner).await?,
            }

            on_finished(index, &self.tests[index]);

            if self.record_completion(index) {
                break;
            }
        }

        Ok(())
    }

    async fn execute_in_pool<F>(
        &mut self,
        deadline: Option<tokio::time::Instant>,
        on_finished: &mut F,
    ) -> Result<(), error::Error>
    where
        F: FnMut(usize, &TestCase),
    {
        let groups: HashMap<String, Arc<Semaphore>> = self
            .runner
            .parallelism_groups
            .iter()
            .map(|(name, limit)| (name.clone(), Arc::new(Semaphore::new(*limit))))
            .collect();

        let mut workers = JoinSet::new();
        let mut next = 0;

        loop {
            while next < self.tests.len() && workers.len() < self.runner.jobs {
                let test = self.tests[next].clone();
                let group = test
                    .config
                    .parallelism_group
                    .as_ref()
                    .and_then(|name| groups.get(name))
                    .cloned();

                workers.spawn(run_worker(next, test, Arc::clone(&self.runner), group));
                next += 1;
            }

            let joined = match deadline {
                Some(deadline) => {
                    if let Ok(joined) = tokio::time::timeout_at(deadline, workers.join_next()).await {
                        joined
                    } else {
                        workers.abort_all();
                        return Err(self.deadline_error());
                    }
                }
                None => workers.join_next().await,
            };

            let Some(joined) = joined else {
                break;
            };

            let (index, test) = joined??;
            self.tests[index] = test;
            on_finished(index, &self.tests[index]);

            if self.record_completion(index) {
                tracing::debug!(
                    target: trace_categories::DISPATCH,
                    "reached {} failures; stopping",
                    self.failures
                );
                workers.abort_all();
                break;
            }
        }

        Ok(())
    }

    /// Counts a finished test's failure. Returns whether the run should stop.
    fn record_completion(&mut self, index: usize) -> bool {
        if self.tests[index]
            .result()
            .is_some_and(|r| r.code.is_failure())
        {
            self.failures += 1;
        }

        self.runner
            .max_failures
            .is_some_and(|max| self.failures >= max)
    }

    fn mark_unfinished(&mut self) -> Result<(), error::Error> {
        for test in &mut self.tests {
            if test.result().is_none() {
                test.set_result(TestResult::new(ResultCode::Unresolved, "test was not run"))?;
            }
        }
        Ok(())
    }

    fn deadline_error(&self) -> error::Error {
        error::Error::DeadlineExceeded(self.runner.max_time.unwrap_or_default())
    }
}

async fn run_worker(
    index: usize,
    mut test: TestCase,
    runner: Arc<RunnerConfig>,
    group: Option<Arc<Semaphore>>,
) -> Result<(usize, TestCase), error::Error> {
    // The permit is held until the test finishes.
    let _permit = match group {
        Some(group) => group.acquire_owned().await.ok(),
        None => None,
    };

    tracing::debug!(target: trace_categories::DISPATCH, "starting {}", test.full_name());
    runner::execute_test(&mut test, &runner).await?;

    Ok((index, test))
}
