//! Test formats: how tests are found within a directory and how a single test is run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::builtins::BuiltinRegistry;
use crate::config::{RunnerConfig, TestingConfig};
use crate::directives::KeywordRegistry;
use crate::results::{ResultCode, TestResult};
use crate::test::{TestCase, TestSuite};
use crate::{error, processes, runner};

/// A format for collecting and running tests.
#[async_trait::async_trait]
pub trait TestFormat: std::fmt::Debug + Send + Sync {
    /// Returns the name the format is registered under.
    fn name(&self) -> &str;

    /// Collects the tests contained directly in a directory of a suite. Files whose names
    /// start with `.`, excluded names, and directories are skipped; the remaining files are
    /// tests if their extension is one of the configured suffixes.
    ///
    /// # Arguments
    ///
    /// * `suite` - The suite being searched.
    /// * `path_in_suite` - Path components of the directory within the suite.
    /// * `config` - Configuration in effect for the directory.
    fn collect_tests_in_directory(
        &self,
        suite: &Arc<TestSuite>,
        path_in_suite: &[String],
        config: &Arc<TestingConfig>,
    ) -> Result<Box<dyn Iterator<Item = TestCase> + Send>, error::Error> {
        let names = candidate_file_names(&suite.source_path(path_in_suite), config)?;

        let suite = Arc::clone(suite);
        let config = Arc::clone(config);
        let path_in_suite = path_in_suite.to_vec();

        Ok(Box::new(names.into_iter().map(move |name| {
            let mut components = path_in_suite.clone();
            components.push(name);
            TestCase::new(Arc::clone(&suite), components, Arc::clone(&config))
        })))
    }

    /// Runs a single test. Errors returned here are reported as an unresolved result.
    ///
    /// # Arguments
    ///
    /// * `test` - The test to run; directive parsing may update its gating lists.
    /// * `runner` - The run's global options.
    async fn execute(
        &self,
        test: &mut TestCase,
        runner: &RunnerConfig,
    ) -> Result<TestResult, error::Error>;
}

/// Returns the sorted names of the files in `dir` that are candidate tests under `config`.
fn candidate_file_names(dir: &Path, config: &TestingConfig) -> Result<Vec<String>, error::Error> {
    let mut names = vec![];

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') || config.excludes.contains(&name) {
            continue;
        }

        if entry.path().is_dir() {
            continue;
        }

        if has_test_suffix(&name, config) {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

fn has_test_suffix(name: &str, config: &TestingConfig) -> bool {
    let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    config
        .suffixes
        .iter()
        .any(|suffix| suffix.strip_prefix('.').unwrap_or(suffix) == ext)
}

/// Tests whose directives embed shell commands, run by the internal interpreter or by an
/// external shell.
#[derive(Debug)]
pub struct ShTest {
    name: &'static str,
    execute_external: bool,
    keywords: Arc<KeywordRegistry>,
    builtins: Arc<BuiltinRegistry>,
}

impl ShTest {
    /// Returns a new shell-test format.
    ///
    /// # Arguments
    ///
    /// * `execute_external` - Whether scripts run in an external shell.
    pub fn new(execute_external: bool) -> Self {
        Self {
            name: if execute_external { "sh-external" } else { "sh" },
            execute_external,
            keywords: Arc::new(KeywordRegistry::standard()),
            builtins: Arc::new(BuiltinRegistry::standard()),
        }
    }

    /// Replaces the directive keywords recognized by the format.
    #[must_use]
    pub fn with_keywords(mut self, keywords: KeywordRegistry) -> Self {
        self.keywords = Arc::new(keywords);
        self
    }
}

#[async_trait::async_trait]
impl TestFormat for ShTest {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        test: &mut TestCase,
        runner: &RunnerConfig,
    ) -> Result<TestResult, error::Error> {
        runner::execute_sh_test(
            test,
            runner,
            &self.keywords,
            &self.builtins,
            self.execute_external || runner.force_external_shell,
        )
        .await
    }
}

/// Tests that are themselves executables; exiting with status 0 is a pass.
#[derive(Debug, Default)]
pub struct ExecutableTest;

#[async_trait::async_trait]
impl TestFormat for ExecutableTest {
    fn name(&self) -> &str {
        "executable"
    }

    fn collect_tests_in_directory(
        &self,
        suite: &Arc<TestSuite>,
        path_in_suite: &[String],
        config: &Arc<TestingConfig>,
    ) -> Result<Box<dyn Iterator<Item = TestCase> + Send>, error::Error> {
        let dir = suite.source_path(path_in_suite);
        let names: Vec<String> = candidate_file_names(&dir, config)?
            .into_iter()
            .filter(|name| processes::is_executable(&dir.join(name)))
            .collect();

        let suite = Arc::clone(suite);
        let config = Arc::clone(config);
        let path_in_suite = path_in_suite.to_vec();

        Ok(Box::new(names.into_iter().map(move |name| {
            let mut components = path_in_suite.clone();
            components.push(name);
            TestCase::new(Arc::clone(&suite), components, Arc::clone(&config))
        })))
    }

    async fn execute(
        &self,
        test: &mut TestCase,
        runner: &RunnerConfig,
    ) -> Result<TestResult, error::Error> {
        if test.config.unsupported {
            return Ok(TestResult::new(ResultCode::Unsupported, "Test is unsupported"));
        }

        let source_path = test.source_path();
        let mut command = tokio::process::Command::new(&source_path);
        if let Some(dir) = source_path.parent() {
            command.current_dir(dir);
        }
        command.env_clear().envs(&test.config.environment);

        let output = processes::run_to_completion(command, runner.timeout).await?;

        if output.timed_out {
            return Ok(TestResult::new(
                ResultCode::Timeout,
                format!("{}{}", output.stdout, output.stderr),
            ));
        }

        if output.exit_code == 0 {
            Ok(TestResult::new(ResultCode::Pass, ""))
        } else {
            Ok(TestResult::new(
                ResultCode::Fail,
                format!("{}{}", output.stdout, output.stderr),
            ))
        }
    }
}

/// An explicitly constructed registry of test formats, looked up by name from configuration
/// files.
#[derive(Clone, Debug, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn TestFormat>>,
}

impl FormatRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registry holding the standard formats: `sh`, `sh-external` and `executable`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShTest::new(false)));
        registry.register(Arc::new(ShTest::new(true)));
        registry.register(Arc::new(ExecutableTest));
        registry
    }

    /// Registers a format under its name, replacing any format already registered there.
    pub fn register(&mut self, format: Arc<dyn TestFormat>) {
        self.formats.insert(format.name().to_owned(), format);
    }

    /// Looks up a format by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TestFormat>> {
        self.formats.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn make_suite(root: &Path, suffixes: &[&str], excludes: &[&str]) -> Arc<TestSuite> {
        let mut config = TestingConfig::root(&RunnerConfig::default());
        config.suffixes = suffixes.iter().map(|s| (*s).to_owned()).collect();
        config.excludes = excludes.iter().map(|s| (*s).to_owned()).collect();

        Arc::new(TestSuite {
            name: String::from("suite"),
            source_root: root.to_path_buf(),
            exec_root: root.to_path_buf(),
            config: Arc::new(config),
        })
    }

    #[test]
    fn collects_matching_files_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.txt", "a.txt", ".hidden.txt", "skip.txt", "c.md", "noext"] {
            std::fs::write(dir.path().join(name), "")?;
        }
        std::fs::create_dir(dir.path().join("sub.txt"))?;

        let suite = make_suite(dir.path(), &["txt", ".test"], &["skip.txt"]);
        std::fs::write(dir.path().join("d.test"), "")?;

        let format = ShTest::new(false);
        let tests: Vec<_> = format
            .collect_tests_in_directory(&suite, &[], &suite.config)?
            .map(|t| t.path_in_suite.join("/"))
            .collect();

        assert_eq!(tests, ["a.txt", "b.txt", "d.test"]);
        Ok(())
    }

    #[test]
    fn collects_within_subdirectory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("sub").join("x.txt"), "")?;

        let suite = make_suite(dir.path(), &["txt"], &[]);
        let tests: Vec<_> = ShTest::new(false)
            .collect_tests_in_directory(&suite, &["sub".into()], &suite.config)?
            .collect();

        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].full_name(), "suite :: sub/x.txt");
        assert_eq!(tests[0].source_path(), PathBuf::from(dir.path()).join("sub").join("x.txt"));
        Ok(())
    }

    #[test]
    fn standard_registry() {
        let registry = FormatRegistry::standard();
        for name in ["sh", "sh-external", "executable"] {
            assert_eq!(registry.get(name).map(|f| f.name().to_owned()), Some(name.to_owned()));
        }
        assert!(registry.get("other").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_tests() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let write_script = |name: &str, body: &str, mode: u32| -> Result<()> {
            let path = dir.path().join(name);
            std::fs::write(&path, body)?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
            Ok(())
        };

        write_script("pass.sh", "#!/bin/sh\nexit 0\n", 0o755)?;
        write_script("fail.sh", "#!/bin/sh\necho oops\nexit 3\n", 0o755)?;
        write_script("data.sh", "not executable\n", 0o644)?;

        let suite = make_suite(dir.path(), &["sh"], &[]);
        let format = ExecutableTest;
        let mut tests: Vec<_> = format
            .collect_tests_in_directory(&suite, &[], &suite.config)?
            .collect();

        let names: Vec<_> = tests.iter().map(|t| t.path_in_suite.join("/")).collect();
        assert_eq!(names, ["fail.sh", "pass.sh"]);

        let runner = RunnerConfig::default();
        let fail = format.execute(&mut tests[0], &runner).await?;
        assert_eq!(fail.code, ResultCode::Fail);
        assert_eq!(fail.output, "oops\n");

        let pass = format.execute(&mut tests[1], &runner).await?;
        assert_eq!(pass.code, ResultCode::Pass);
        Ok(())
    }
}
