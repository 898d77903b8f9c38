//! Test suite discovery: locating suites from input paths, loading their configuration, and
//! enumerating their tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use normalize_path::NormalizePath as _;

use crate::config::{ConfigFile, RunnerConfig, TestingConfig};
use crate::formats::FormatRegistry;
use crate::test::{TestCase, TestSuite};
use crate::{error, trace_categories};

/// Directory names never searched for tests.
const SKIPPED_DIRECTORIES: &[&str] = &["Output", ".git", ".svn"];

type LocalConfigKey = (PathBuf, PathBuf, Vec<String>);

/// Discovers suites and tests. Suites and local configurations are loaded once and cached;
/// errors are counted, and warnings recorded, as discovery proceeds.
pub struct Discovery {
    runner: RunnerConfig,
    formats: FormatRegistry,
    root_config: Arc<TestingConfig>,
    suites: HashMap<PathBuf, Option<Arc<TestSuite>>>,
    local_configs: HashMap<LocalConfigKey, Arc<TestingConfig>>,
    num_errors: usize,
    warnings: Vec<String>,
}

impl Discovery {
    /// Returns a new discovery context.
    ///
    /// # Arguments
    ///
    /// * `runner` - The run's global options.
    /// * `formats` - Test formats that configuration files may name.
    pub fn new(runner: RunnerConfig, formats: FormatRegistry) -> Self {
        let root_config = Arc::new(TestingConfig::root(&runner));
        Self {
            runner,
            formats,
            root_config,
            suites: HashMap::new(),
            local_configs: HashMap::new(),
            num_errors: 0,
            warnings: vec![],
        }
    }

    /// Returns the run's global options.
    pub const fn runner(&self) -> &RunnerConfig {
        &self.runner
    }

    /// Returns the number of errors encountered so far.
    pub const fn num_errors(&self) -> usize {
        self.num_errors
    }

    /// Returns the warnings reported so far.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Finds the tests named by a list of inputs. Each input is a path to a test, or to a
    /// directory searched for tests; an input of the form `@file` names a file listing
    /// further inputs, one per line. Tests are returned in discovery order.
    ///
    /// Fails if any error was encountered during discovery.
    ///
    /// # Arguments
    ///
    /// * `inputs` - The inputs to search.
    pub fn find_tests_for_inputs<S: AsRef<str>>(
        &mut self,
        inputs: &[S],
    ) -> Result<Vec<TestCase>, error::Error> {
        let mut expanded = vec![];
        for input in inputs {
            let input = input.as_ref();
            if let Some(list_path) = input.strip_prefix('@') {
                let contents = std::fs::read_to_string(list_path)?;
                expanded.extend(
                    contents
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(ToOwned::to_owned),
                );
            } else {
                expanded.push(input.to_owned());
            }
        }

        let mut tests = vec![];
        for input in expanded {
            let Some((suite, path_in_suite)) = self.find_suite(Path::new(&input)) else {
                self.warn(format!("unable to find test suite for '{input}'"));
                continue;
            };

            let found = self.collect_tests(&suite, &path_in_suite);
            if found.is_empty() {
                self.warn(format!("input '{input}' contained no tests"));
            }
            tests.extend(found);
        }

        if self.num_errors > 0 {
            return Err(error::Error::DiscoveryFailed(self.num_errors));
        }

        Ok(tests)
    }

    /// Finds the suite containing a path, by searching it and its ancestors for a suite
    /// configuration file. Returns the suite and the path's components within it.
    ///
    /// # Arguments
    ///
    /// * `path` - A path to a test or directory.
    pub fn find_suite(&mut self, path: &Path) -> Option<(Arc<TestSuite>, Vec<String>)> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| {
            std::path::absolute(path).map_or_else(|_| path.normalize(), |p| p.normalize())
        });

        let mut components = vec![];
        let mut current = path.as_path();

        loop {
            if let Some(config_path) = self.suite_config_in(current) {
                let suite = self.load_suite(current, &config_path)?;
                components.reverse();
                return Some((suite, components));
            }

            let name = current.file_name()?;
            components.push(name.to_string_lossy().to_string());
            current = current.parent()?;
        }
    }

    /// Collects the tests at a path within a suite: the path itself if it names a file,
    /// otherwise everything found beneath it, including the tests of nested suites.
    ///
    /// # Arguments
    ///
    /// * `suite` - The suite to search.
    /// * `path_in_suite` - Path components within the suite.
    pub fn collect_tests(&mut self, suite: &Arc<TestSuite>, path_in_suite: &[String]) -> Vec<TestCase> {
        let mut tests = vec![];
        self.collect_tests_into(suite, path_in_suite, &mut tests);
        tests
    }

    fn collect_tests_into(
        &mut self,
        suite: &Arc<TestSuite>,
        path_in_suite: &[String],
        tests: &mut Vec<TestCase>,
    ) {
        let source_path = suite.source_path(path_in_suite);
        if !source_path.exists() {
            return;
        }

        if !source_path.is_dir() {
            let parent = &path_in_suite[..path_in_suite.len().saturating_sub(1)];
            let config = self.local_config(suite, parent);
            tests.push(TestCase::new(
                Arc::clone(suite),
                path_in_suite.to_vec(),
                config,
            ));
            return;
        }

        let config = self.local_config(suite, path_in_suite);

        if let Some(format) = config.test_format.clone() {
            match format.collect_tests_in_directory(suite, path_in_suite, &config) {
                Ok(found) => tests.extend(found),
                Err(e) => self.error(format!(
                    "failed to collect tests in {}: {e}",
                    source_path.display()
                )),
            }
        }

        let subdirs: Vec<String> = walkdir::WalkDir::new(&source_path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| {
                !SKIPPED_DIRECTORIES.contains(&name.as_str()) && !config.excludes.contains(name)
            })
            .collect();

        for name in subdirs {
            let mut sub_path = path_in_suite.to_vec();
            sub_path.push(name);

            let exec_dir = suite.exec_path(&sub_path);
            let source_dir = suite.source_path(&sub_path);

            let nested = if self.suite_config_in(&exec_dir).is_some() {
                self.find_suite(&exec_dir)
            } else if self.suite_config_in(&source_dir).is_some() {
                self.find_suite(&source_dir)
            } else {
                None
            };

            match nested {
                Some((nested_suite, _)) if Arc::ptr_eq(&nested_suite, suite) => (),
                Some((nested_suite, nested_path)) => {
                    let before = tests.len();
                    self.collect_tests_into(&nested_suite, &nested_path, tests);
                    if tests.len() == before {
                        self.warn(format!(
                            "test suite '{}' contained no tests",
                            nested_suite.name
                        ));
                    }
                }
                None => self.collect_tests_into(suite, &sub_path, tests),
            }
        }
    }

    /// Returns the path of the suite configuration file in a directory, if any. Site
    /// configurations take priority.
    fn suite_config_in(&self, dir: &Path) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }

        self.runner
            .site_config_names()
            .into_iter()
            .chain(self.runner.suite_config_names())
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    fn load_suite(&mut self, dir: &Path, config_path: &Path) -> Option<Arc<TestSuite>> {
        if let Some(cached) = self.suites.get(dir) {
            return cached.clone();
        }

        tracing::debug!(
            target: trace_categories::DISCOVERY,
            "loading suite in {}",
            dir.display()
        );

        let suite = match self.load_suite_config(config_path) {
            Ok(config) => {
                let source_root = config
                    .test_source_root
                    .clone()
                    .unwrap_or_else(|| dir.to_path_buf());
                let exec_root = config
                    .test_exec_root
                    .clone()
                    .unwrap_or_else(|| dir.to_path_buf());

                Some(Arc::new(TestSuite {
                    name: config.name.clone(),
                    source_root,
                    exec_root,
                    config: Arc::new(config),
                }))
            }
            Err(e) => {
                self.error(e.to_string());
                None
            }
        };

        self.suites.insert(dir.to_path_buf(), suite.clone());
        suite
    }

    fn load_suite_config(&self, config_path: &Path) -> Result<TestingConfig, error::Error> {
        let file = ConfigFile::load(config_path)?;
        let main_config = file.main_config.clone();

        let config = TestingConfig::derive(&self.root_config, file, &self.formats)?;

        match main_config {
            Some(main_path) => {
                let main = ConfigFile::load(&main_path)?;
                TestingConfig::derive(&Arc::new(config), main, &self.formats)
            }
            None => Ok(config),
        }
    }

    /// Returns the configuration in effect for a directory within a suite. Directories
    /// without a local configuration file share their parent's configuration.
    fn local_config(&mut self, suite: &Arc<TestSuite>, path_in_suite: &[String]) -> Arc<TestingConfig> {
        let Some((_, parent_path)) = path_in_suite.split_last() else {
            return Arc::clone(&suite.config);
        };

        let key = (
            suite.source_root.clone(),
            suite.exec_root.clone(),
            path_in_suite.to_vec(),
        );
        if let Some(config) = self.local_configs.get(&key) {
            return Arc::clone(config);
        }

        let parent = self.local_config(suite, parent_path);
        let dir = suite.source_path(path_in_suite);

        let local_file = self
            .runner
            .local_config_names()
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file());

        let config = match local_file {
            Some(path) => {
                let derived = ConfigFile::load(&path)
                    .and_then(|file| TestingConfig::derive(&parent, file, &self.formats));
                match derived {
                    Ok(config) => Arc::new(config),
                    Err(e) => {
                        self.error(e.to_string());
                        parent
                    }
                }
            }
            None => parent,
        };

        self.local_configs.insert(key, Arc::clone(&config));
        config
    }

    fn warn(&mut self, message: String) {
        tracing::warn!(target: trace_categories::DISCOVERY, "{message}");
        self.warnings.push(message);
    }

    fn error(&mut self, message: String) {
        tracing::error!(target: trace_categories::DISCOVERY, "{message}");
        self.num_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    const SUITE_CONFIG: &str = "name = \"top\"\nsuffixes = [\"txt\"]\ntest_format = \"sh\"\n";

    fn write(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn names(tests: &[TestCase]) -> Vec<String> {
        tests.iter().map(TestCase::full_name).collect()
    }

    #[test]
    fn finds_suite_from_nested_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(&dir.path().join("shtest.toml"), SUITE_CONFIG)?;
        write(&dir.path().join("a").join("b").join("t.txt"), "")?;

        let mut discovery = Discovery::new(RunnerConfig::default(), FormatRegistry::standard());
        let (suite, path) = discovery
            .find_suite(&dir.path().join("a").join("b").join("t.txt"))
            .ok_or_else(|| anyhow::anyhow!("suite not found"))?;

        assert_eq!(suite.name, "top");
        assert_eq!(path, ["a", "b", "t.txt"]);

        let (again, _) = discovery
            .find_suite(dir.path())
            .ok_or_else(|| anyhow::anyhow!("suite not found"))?;
        assert!(Arc::ptr_eq(&suite, &again));
        Ok(())
    }

    #[test]
    fn site_config_takes_priority() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(&dir.path().join("main.toml"), "suffixes = [\"txt\"]\ntest_format = \"sh\"\n")?;
        write(&dir.path().join("shtest.toml"), "name = \"plain\"\n")?;
        write(
            &dir.path().join("shtest.site.toml"),
            "name = \"site\"\nmain_config = \"main.toml\"\n",
        )?;
        write(&dir.path().join("t.txt"), "")?;

        let mut discovery = Discovery::new(RunnerConfig::default(), FormatRegistry::standard());
        let tests = discovery.find_tests_for_inputs(&[dir.path().to_string_lossy()])?;
        assert_eq!(names(&tests), ["site :: t.txt"]);
        Ok(())
    }

    #[test]
    fn local_configs_apply_to_subtrees() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            &dir.path().join("shtest.toml"),
            &format!("{SUITE_CONFIG}excludes = [\"skipped\"]\n"),
        )?;
        write(&dir.path().join("a.txt"), "")?;
        write(&dir.path().join("sub").join("b.txt"), "")?;
        write(&dir.path().join("sub").join("c.test"), "")?;
        write(
            &dir.path().join("sub").join("shtest.local.toml"),
            "suffixes = [\"test\"]\nunsupported = true\n",
        )?;
        write(&dir.path().join("sub").join("deeper").join("d.test"), "")?;
        write(&dir.path().join("skipped").join("e.txt"), "")?;
        write(&dir.path().join("Output").join("f.txt"), "")?;

        let mut discovery = Discovery::new(RunnerConfig::default(), FormatRegistry::standard());
        let tests = discovery.find_tests_for_inputs(&[dir.path().to_string_lossy()])?;
        assert_eq!(
            names(&tests),
            ["top :: a.txt", "top :: sub/c.test", "top :: sub/deeper/d.test"]
        );

        assert!(!tests[0].config.unsupported);
        assert!(tests[1].config.unsupported);
        assert!(Arc::ptr_eq(&tests[1].config, &tests[2].config));
        Ok(())
    }

    #[test]
    fn single_test_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(&dir.path().join("shtest.toml"), SUITE_CONFIG)?;
        write(&dir.path().join("sub").join("x.txt"), "")?;
        write(&dir.path().join("sub").join("shtest.local.toml"), "early = true\n")?;

        let mut discovery = Discovery::new(RunnerConfig::default(), FormatRegistry::standard());
        let input = dir.path().join("sub").join("x.txt");
        let tests = discovery.find_tests_for_inputs(&[input.to_string_lossy()])?;

        assert_eq!(names(&tests), ["top :: sub/x.txt"]);
        assert!(tests[0].is_early());
        Ok(())
    }

    #[test]
    fn errors_and_warnings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(&dir.path().join("good").join("shtest.toml"), SUITE_CONFIG)?;
        write(
            &dir.path().join("bad").join("shtest.toml"),
            "test_format = \"nonexistent\"\n",
        )?;

        let mut discovery = Discovery::new(RunnerConfig::default(), FormatRegistry::standard());
        let result = discovery.find_tests_for_inputs(&[
            dir.path().join("good").to_string_lossy(),
            dir.path().join("bad").to_string_lossy(),
        ]);

        assert!(matches!(result, Err(error::Error::DiscoveryFailed(1))));
        assert_eq!(discovery.num_errors(), 1);
        assert!(
            discovery
                .warnings()
                .iter()
                .any(|w| w.contains("contained no tests"))
        );
        Ok(())
    }
}
