//! Infrastructure for the internal shell's built-in commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use normalize_path::NormalizePath as _;

use crate::error;
use crate::interp::ShellEnvironment;

mod cd;
mod colon;
mod diff;
mod echo;
mod export;
mod mkdir;
mod rm;

/// Exit codes for built-in commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    /// The command was successful.
    Success,
    /// The command failed.
    Failure,
    /// The command returned a specific custom numerical exit code.
    Custom(i32),
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::Custom(code) => code,
        }
    }
}

/// Context in which a built-in command executes. Output is buffered and routed by the
/// interpreter according to the command's redirects.
pub struct BuiltinContext<'a> {
    /// The environment of the script being executed.
    pub env: &'a mut ShellEnvironment,
    /// Bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Bytes written to standard error.
    pub stderr: Vec<u8>,
}

impl<'a> BuiltinContext<'a> {
    /// Returns a new context with empty output buffers.
    pub const fn new(env: &'a mut ShellEnvironment) -> Self {
        Self {
            env,
            stdout: vec![],
            stderr: vec![],
        }
    }

    /// Resolves a path argument against the environment's working directory.
    pub fn absolute_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.normalize()
        } else {
            self.env.cwd.join(path).normalize()
        }
    }
}

/// Type of a function implementing a built-in command.
///
/// # Arguments
///
/// * The context in which the command is being executed.
/// * The arguments to the command, starting with the command's name.
pub type CommandExecuteFunc =
    fn(&mut BuiltinContext<'_>, Vec<String>) -> Result<ExitCode, error::Error>;

/// Trait implemented by built-in commands.
pub trait Command: Parser {
    /// Instantiates the built-in command with the given arguments.
    ///
    /// # Arguments
    ///
    /// * `args` - The arguments to the command, starting with the command's name.
    fn new<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = String>,
    {
        Self::try_parse_from(args)
    }

    /// Executes the built-in command in the provided context.
    ///
    /// # Arguments
    ///
    /// * `context` - The context in which the command is being executed.
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error>;
}

/// Encapsulates a registration for a built-in command.
#[derive(Clone)]
pub struct Registration {
    /// Function to execute the builtin.
    pub execute_func: CommandExecuteFunc,

    /// Whether a host executable of the same name stands in for the builtin when it appears
    /// within a multi-command pipeline.
    pub external_in_pipeline: bool,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("external_in_pipeline", &self.external_in_pipeline)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Returns a registration whose builtin is replaced by a host executable in pipelines.
    #[must_use]
    pub const fn external_in_pipeline(mut self) -> Self {
        self.external_in_pipeline = true;
        self
    }
}

/// Returns a built-in command registration, given an implementation of the
/// `Command` trait.
pub fn builtin<B: Command>() -> Registration {
    Registration {
        execute_func: exec_builtin::<B>,
        external_in_pipeline: false,
    }
}

fn exec_builtin<T: Command>(
    context: &mut BuiltinContext<'_>,
    args: Vec<String>,
) -> Result<ExitCode, error::Error> {
    let name = args.first().cloned().unwrap_or_default();

    let command = T::new(args).map_err(|e| {
        let rendered = e.to_string();
        let message = rendered.lines().next().unwrap_or_default();
        let message = message.strip_prefix("error: ").unwrap_or(message);
        error::Error::Unsupported(format!("Unsupported: '{name}': {message}"))
    })?;

    command.execute(context)
}

/// An explicitly constructed registry of built-in commands, looked up by name.
#[derive(Clone, Debug, Default)]
pub struct BuiltinRegistry {
    builtins: HashMap<String, Registration>,
}

impl BuiltinRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registry holding the standard built-in commands.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry.register(":", builtin::<colon::ColonCommand>());
        registry.register("cd", builtin::<cd::CdCommand>());
        registry.register(
            "diff",
            builtin::<diff::DiffCommand>().external_in_pipeline(),
        );
        registry.register(
            "echo",
            builtin::<echo::EchoCommand>().external_in_pipeline(),
        );
        registry.register("export", builtin::<export::ExportCommand>());
        registry.register("mkdir", builtin::<mkdir::MkdirCommand>());
        registry.register("rm", builtin::<rm::RmCommand>());

        registry
    }

    /// Registers a builtin under a name, replacing any builtin already registered there.
    pub fn register<S: Into<String>>(&mut self, name: S, registration: Registration) {
        self.builtins.insert(name.into(), registration);
    }

    /// Looks up a builtin by name.
    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.builtins.get(name)
    }

    /// Returns whether a builtin is registered under the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }
}
