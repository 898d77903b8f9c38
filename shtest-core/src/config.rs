//! Configuration for suites, directories, and the overall run.
//!
//! Suite configuration is data: a site, suite, or local configuration file holds a set of
//! overrides that is applied on top of the configuration of the enclosing scope. The result
//! is an immutable [`TestingConfig`] that remembers its parent and the overrides it applied.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::formats::{FormatRegistry, TestFormat};
use crate::{error, trace_categories};

/// Host environment variables passed through to every test.
const PASS_THROUGH_ENV_VARS: &[&str] = &[
    "TMPDIR",
    "TEMP",
    "TMP",
    "TEMPDIR",
    "HOME",
    "LD_LIBRARY_PATH",
    "LIBRARY_PATH",
    "LD_PRELOAD",
    "SYSTEMROOT",
    "TERM",
    "SSH_AUTH_SOCK",
    "SOURCE_DATE_EPOCH",
];

/// The contents of a site, suite, or local configuration file. Every key is optional; absent
/// keys inherit from the enclosing scope.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Name of the suite.
    pub name: Option<String>,
    /// File suffixes (without the leading dot) that identify test files.
    pub suffixes: Option<Vec<String>>,
    /// Name of the registered test format used to collect and run tests.
    pub test_format: Option<String>,
    /// Environment variables to add or replace.
    pub environment: BTreeMap<String, String>,
    /// Substitutions to append, as `[pattern, value]` pairs.
    pub substitutions: Vec<(String, String)>,
    /// File and directory names to skip during discovery.
    pub excludes: Option<Vec<String>>,
    /// Features to add to the available set.
    pub available_features: Vec<String>,
    /// If non-empty, only tests that require one of these features are run.
    pub limit_to_features: Option<Vec<String>>,
    /// Whether pipelines fail when any stage fails.
    pub pipefail: Option<bool>,
    /// Whether tests should be scheduled ahead of others.
    pub early: Option<bool>,
    /// Whether every test in scope is unsupported.
    pub unsupported: Option<bool>,
    /// Number of times a failing test is retried.
    pub test_retry_attempts: Option<u32>,
    /// Name of the parallelism group that bounds concurrent tests in scope.
    pub parallelism_group: Option<String>,
    /// Target triple used when evaluating feature expressions.
    pub target_triple: Option<String>,
    /// Root of the suite's test sources.
    pub test_source_root: Option<PathBuf>,
    /// Root of the suite's test outputs.
    pub test_exec_root: Option<PathBuf>,
    /// Free-form values, merged key-wise.
    pub extra: BTreeMap<String, String>,
    /// In a site configuration, the suite configuration loaded on top of it.
    pub main_config: Option<PathBuf>,
}

impl ConfigFile {
    /// Loads a configuration file. TOML and YAML files are recognized by their extension;
    /// relative paths in the file are resolved against the file's directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file.
    pub fn load(path: &Path) -> Result<Self, error::Error> {
        tracing::debug!(target: trace_categories::CONFIG, "loading config {}", path.display());

        let to_error = |message: String| error::Error::InvalidConfigFile(path.to_owned(), message);

        let text = std::fs::read_to_string(path).map_err(|e| to_error(e.to_string()))?;

        let mut file: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => {
                    serde_yaml::from_str(&text).map_err(|e| to_error(e.to_string()))?
                }
                _ => toml::from_str(&text).map_err(|e| to_error(e.to_string()))?,
            }
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        for p in [
            &mut file.test_source_root,
            &mut file.test_exec_root,
            &mut file.main_config,
        ]
        .into_iter()
        .flatten()
        {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        }

        Ok(file)
    }
}

/// Configuration in effect for a suite or directory.
#[derive(Clone, Debug)]
pub struct TestingConfig {
    /// Name of the suite.
    pub name: String,
    /// File suffixes (without the leading dot) that identify test files.
    pub suffixes: BTreeSet<String>,
    /// The format used to collect and run tests.
    pub test_format: Option<Arc<dyn TestFormat>>,
    /// Environment tests run with.
    pub environment: BTreeMap<String, String>,
    /// Ordered `(pattern, value)` substitutions applied to commands.
    pub substitutions: Vec<(String, String)>,
    /// File and directory names skipped during discovery.
    pub excludes: BTreeSet<String>,
    /// Available features.
    pub available_features: BTreeSet<String>,
    /// If non-empty, only tests that require one of these features are run.
    pub limit_to_features: BTreeSet<String>,
    /// Whether pipelines fail when any stage fails.
    pub pipefail: bool,
    /// Whether tests in scope are scheduled ahead of others.
    pub is_early: bool,
    /// Whether every test in scope is unsupported.
    pub unsupported: bool,
    /// Number of times a failing test is retried.
    pub test_retry_attempts: u32,
    /// Name of the parallelism group bounding concurrent tests in scope.
    pub parallelism_group: Option<String>,
    /// Target triple used when evaluating feature expressions.
    pub target_triple: String,
    /// Root of the suite's test sources.
    pub test_source_root: Option<PathBuf>,
    /// Root of the suite's test outputs.
    pub test_exec_root: Option<PathBuf>,
    /// Free-form values.
    pub extra: BTreeMap<String, String>,
    parent: Option<Arc<Self>>,
    overrides: ConfigFile,
}

impl TestingConfig {
    /// Returns the root configuration for a run, from which every suite configuration derives.
    ///
    /// # Arguments
    ///
    /// * `runner` - The run's global options.
    pub fn root(runner: &RunnerConfig) -> Self {
        let mut environment = BTreeMap::new();

        let mut path_dirs = runner.path.clone();
        if let Some(host_path) = std::env::var_os("PATH") {
            path_dirs.extend(std::env::split_paths(&host_path));
        }
        if let Ok(joined) = std::env::join_paths(path_dirs) {
            environment.insert(String::from("PATH"), joined.to_string_lossy().to_string());
        }

        for var in PASS_THROUGH_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                environment.insert((*var).to_owned(), value);
            }
        }

        Self {
            name: String::from("<unnamed>"),
            suffixes: BTreeSet::new(),
            test_format: None,
            environment,
            substitutions: vec![],
            excludes: BTreeSet::new(),
            available_features: BTreeSet::new(),
            limit_to_features: BTreeSet::new(),
            pipefail: true,
            is_early: false,
            unsupported: false,
            test_retry_attempts: 0,
            parallelism_group: None,
            target_triple: String::new(),
            test_source_root: None,
            test_exec_root: None,
            extra: BTreeMap::new(),
            parent: None,
            overrides: ConfigFile::default(),
        }
    }

    /// Derives a child configuration by applying the given overrides to a parent.
    ///
    /// Environment and free-form values merge key-wise, substitutions are appended,
    /// available features accumulate, and all other present keys replace the parent's value.
    ///
    /// # Arguments
    ///
    /// * `parent` - The configuration of the enclosing scope.
    /// * `overrides` - The overrides to apply.
    /// * `formats` - Registry used to resolve the test format name.
    pub fn derive(
        parent: &Arc<Self>,
        overrides: ConfigFile,
        formats: &FormatRegistry,
    ) -> Result<Self, error::Error> {
        let mut config = Self::clone(parent);
        config.parent = Some(Arc::clone(parent));

        if let Some(name) = &overrides.name {
            config.name.clone_from(name);
        }
        if let Some(suffixes) = &overrides.suffixes {
            config.suffixes = suffixes.iter().cloned().collect();
        }
        if let Some(format_name) = &overrides.test_format {
            let format = formats
                .get(format_name)
                .ok_or_else(|| error::Error::UnknownTestFormat(format_name.clone()))?;
            config.test_format = Some(format);
        }
        config.environment.extend(
            overrides
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        config
            .substitutions
            .extend(overrides.substitutions.iter().cloned());
        if let Some(excludes) = &overrides.excludes {
            config.excludes = excludes.iter().cloned().collect();
        }
        config
            .available_features
            .extend(overrides.available_features.iter().cloned());
        if let Some(limits) = &overrides.limit_to_features {
            config.limit_to_features = limits.iter().cloned().collect();
        }
        if let Some(pipefail) = overrides.pipefail {
            config.pipefail = pipefail;
        }
        if let Some(early) = overrides.early {
            config.is_early = early;
        }
        if let Some(unsupported) = overrides.unsupported {
            config.unsupported = unsupported;
        }
        if let Some(attempts) = overrides.test_retry_attempts {
            config.test_retry_attempts = attempts;
        }
        if overrides.parallelism_group.is_some() {
            config
                .parallelism_group
                .clone_from(&overrides.parallelism_group);
        }
        if let Some(triple) = &overrides.target_triple {
            config.target_triple.clone_from(triple);
        }
        if overrides.test_source_root.is_some() {
            config
                .test_source_root
                .clone_from(&overrides.test_source_root);
        }
        if overrides.test_exec_root.is_some() {
            config.test_exec_root.clone_from(&overrides.test_exec_root);
        }
        config.extra.extend(
            overrides
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        config.overrides = overrides;
        Ok(config)
    }

    /// Returns the configuration this one was derived from, if any.
    pub const fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Returns the overrides applied on top of the parent configuration.
    pub const fn overrides(&self) -> &ConfigFile {
        &self.overrides
    }
}

/// Global options for a run.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Prefix of configuration file names.
    pub config_prefix: String,
    /// Recognized configuration file extensions, in priority order.
    pub config_extensions: Vec<String>,
    /// Number of tests run concurrently.
    pub jobs: usize,
    /// Stop the run once this many tests have failed.
    pub max_failures: Option<usize>,
    /// Time limit for each test.
    pub timeout: Option<Duration>,
    /// Time limit for the whole run.
    pub max_time: Option<Duration>,
    /// Report every runnable test as passing without running it.
    pub no_execute: bool,
    /// Overrides the configured number of retries for every test.
    pub max_retries_per_test: Option<u32>,
    /// Maximum number of concurrently running tests per parallelism group.
    pub parallelism_groups: BTreeMap<String, usize>,
    /// Whether external shell scripts trace every command.
    pub echo_all_commands: bool,
    /// Whether shell tests always run in an external shell.
    pub force_external_shell: bool,
    /// Shell used for external shell scripts.
    pub bash_path: Option<PathBuf>,
    /// Value of the `%{interpreter}` substitution.
    pub interpreter: Option<String>,
    /// Free-form parameters supplied for the run.
    pub params: BTreeMap<String, String>,
    /// Directories placed ahead of the host's `PATH`.
    pub path: Vec<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            config_prefix: String::from("shtest"),
            config_extensions: vec![String::from("toml"), String::from("yaml")],
            jobs: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            max_failures: None,
            timeout: None,
            max_time: None,
            no_execute: false,
            max_retries_per_test: None,
            parallelism_groups: BTreeMap::new(),
            echo_all_commands: false,
            force_external_shell: false,
            bash_path: None,
            interpreter: None,
            params: BTreeMap::new(),
            path: vec![],
        }
    }
}

impl RunnerConfig {
    /// Sets the number of concurrently run tests.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Sets the number of failures after which the run stops.
    #[must_use]
    pub const fn with_max_failures(mut self, max_failures: Option<usize>) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Sets the time limit for each test.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the time limit for the whole run.
    #[must_use]
    pub const fn with_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }

    /// Sets whether tests are reported as passing without being run.
    #[must_use]
    pub const fn with_no_execute(mut self, no_execute: bool) -> Self {
        self.no_execute = no_execute;
        self
    }

    /// Overrides the number of retries for every test.
    #[must_use]
    pub const fn with_max_retries_per_test(mut self, retries: Option<u32>) -> Self {
        self.max_retries_per_test = retries;
        self
    }

    /// Bounds the number of concurrently running tests in a parallelism group.
    #[must_use]
    pub fn with_parallelism_group(mut self, name: impl Into<String>, limit: usize) -> Self {
        self.parallelism_groups.insert(name.into(), limit.max(1));
        self
    }

    /// Sets whether external shell scripts trace every command.
    #[must_use]
    pub const fn with_echo_all_commands(mut self, echo: bool) -> Self {
        self.echo_all_commands = echo;
        self
    }

    /// Sets whether shell tests always run in an external shell.
    #[must_use]
    pub const fn with_external_shell(mut self, external: bool) -> Self {
        self.force_external_shell = external;
        self
    }

    /// Sets the shell used for external shell scripts.
    #[must_use]
    pub fn with_bash_path(mut self, path: Option<PathBuf>) -> Self {
        self.bash_path = path;
        self
    }

    /// Sets a free-form parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the configuration file prefix.
    #[must_use]
    pub fn with_config_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_prefix = prefix.into();
        self
    }

    /// Returns the names of site configuration files, in priority order.
    pub fn site_config_names(&self) -> Vec<String> {
        self.config_names_with_infix(".site")
    }

    /// Returns the names of suite configuration files, in priority order.
    pub fn suite_config_names(&self) -> Vec<String> {
        self.config_names_with_infix("")
    }

    /// Returns the names of local configuration files, in priority order.
    pub fn local_config_names(&self) -> Vec<String> {
        self.config_names_with_infix(".local")
    }

    fn config_names_with_infix(&self, infix: &str) -> Vec<String> {
        self.config_extensions
            .iter()
            .map(|ext| format!("{}{infix}.{ext}", self.config_prefix))
            .collect()
    }

    /// Returns the shell used to run external shell scripts, if one can be found.
    pub fn bash_path(&self) -> Option<PathBuf> {
        self.bash_path
            .clone()
            .or_else(|| which::which("bash").ok())
    }

    /// Returns the value of the `%{interpreter}` substitution.
    pub fn interpreter(&self) -> String {
        self.interpreter.clone().unwrap_or_else(|| {
            self.bash_path()
                .map_or_else(|| String::from("/bin/sh"), |p| p.to_string_lossy().to_string())
        })
    }
}
