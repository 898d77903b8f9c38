//! The internal shell: executes parsed command lines against a [`ShellEnvironment`], running
//! built-ins in-process and everything else as child processes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use shtest_parser::Operator;
use shtest_parser::ast::{self, Argument, SequenceOperator, ShellCommand};

use crate::builtins::{BuiltinContext, BuiltinRegistry, Registration};
use crate::processes::{self, Capture, ChildProcess};
use crate::{error, trace_categories};

/// The working directory and environment variables of a script being executed. Built-ins
/// update it in place.
#[derive(Clone, Debug, Default)]
pub struct ShellEnvironment {
    /// The current working directory.
    pub cwd: PathBuf,
    /// Environment variables passed to child processes.
    pub env: BTreeMap<String, String>,
}

impl ShellEnvironment {
    /// Returns a new environment.
    pub const fn new(cwd: PathBuf, env: BTreeMap<String, String>) -> Self {
        Self { cwd, env }
    }
}

/// The outcome of one command run by the internal shell.
#[derive(Clone, Debug)]
pub struct CommandResult {
    /// The command as written.
    pub command: ast::Command,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// The command's exit code.
    pub exit_code: i32,
    /// Whether the script's timeout was reached while the command ran.
    pub timed_out: bool,
    /// Contents of the files the command's pipeline wrote through redirects, as
    /// `(name as written, contents)`, recorded when the command failed.
    pub output_files: Vec<(String, Vec<u8>)>,
}

impl CommandResult {
    const fn new(command: ast::Command) -> Self {
        Self {
            command,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            output_files: vec![],
        }
    }
}

/// An error that stops a script, with the command that caused it.
struct ShellError {
    command: Option<ast::Command>,
    error: error::Error,
}

impl ShellError {
    fn with_command(mut self, command: &ast::Command) -> Self {
        if self.command.is_none() {
            self.command = Some(command.clone());
        }
        self
    }
}

impl From<error::Error> for ShellError {
    fn from(error: error::Error) -> Self {
        Self {
            command: None,
            error,
        }
    }
}

impl From<std::io::Error> for ShellError {
    fn from(error: std::io::Error) -> Self {
        Self::from(error::Error::from(error))
    }
}

fn internal_error(message: impl Into<String>) -> ShellError {
    ShellError::from(error::Error::InternalShell(message.into()))
}

/// Where one of a command's standard streams is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// The default standard input.
    Stdin,
    /// The default standard output: the next pipeline stage, or captured output.
    Stdout,
    /// The default standard error: captured error output.
    Stderr,
    /// A file opened for the pipeline.
    File(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileMode {
    Read,
    Write,
    Append,
}

struct OpenedFile {
    name: String,
    path: PathBuf,
    mode: FileMode,
    file: std::fs::File,
}

/// A write destination that can be duplicated for several streams.
enum Sink {
    Pipe(os_pipe::PipeWriter),
    File(std::fs::File),
}

impl Sink {
    fn stdio(&self) -> std::io::Result<Stdio> {
        Ok(match self {
            Self::Pipe(pipe) => pipe.try_clone()?.into(),
            Self::File(file) => file.try_clone()?.into(),
        })
    }
}

/// One command of a pipeline, after its `env`/`not` prefixes have been processed and its
/// arguments expanded.
struct Stage<'a> {
    command: &'a ast::Command,
    args: Vec<String>,
    env: Option<ShellEnvironment>,
    /// One entry per `not` (or `!`) prefix, outermost first; `true` for `not --crash`.
    nots: Vec<bool>,
}

/// Executes command lines, recording a [`CommandResult`] for every command run.
pub struct ShellExecutor<'a> {
    builtins: &'a BuiltinRegistry,
    deadline: Option<tokio::time::Instant>,
    timed_out: bool,
    results: Vec<CommandResult>,
}

impl<'a> ShellExecutor<'a> {
    /// Returns a new executor.
    ///
    /// # Arguments
    ///
    /// * `builtins` - The built-in commands available to scripts.
    /// * `timeout` - Time limit for everything this executor runs.
    pub fn new(builtins: &'a BuiltinRegistry, timeout: Option<Duration>) -> Self {
        Self {
            builtins,
            deadline: timeout.map(|t| tokio::time::Instant::now() + t),
            timed_out: false,
            results: vec![],
        }
    }

    /// Returns whether the time limit was reached.
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Returns the results of the commands run so far.
    pub fn results(&self) -> &[CommandResult] {
        &self.results
    }

    /// Consumes the executor, returning the results of the commands it ran.
    pub fn into_results(self) -> Vec<CommandResult> {
        self.results
    }

    /// Executes a command line, returning its exit code. An error that stops the command line
    /// is recorded as a result for the offending command, with exit code 127.
    ///
    /// # Arguments
    ///
    /// * `command` - The command line to execute.
    /// * `env` - The environment to execute it in.
    pub async fn execute(&mut self, command: &ShellCommand, env: &mut ShellEnvironment) -> i32 {
        match self.execute_command(command, env).await {
            Ok(exit_code) => exit_code,
            Err(e) => {
                let command = e
                    .command
                    .unwrap_or_else(|| first_command(command).clone());

                tracing::debug!(target: trace_categories::COMMANDS, "{command}: {}", e.error);

                let mut result = CommandResult::new(command);
                result.stderr = e.error.to_string();
                result.exit_code = 127;
                self.results.push(result);

                127
            }
        }
    }

    #[async_recursion::async_recursion]
    async fn execute_command(
        &mut self,
        command: &ShellCommand,
        env: &mut ShellEnvironment,
    ) -> Result<i32, ShellError> {
        if self.deadline_reached() {
            self.timed_out = true;
        }

        // No new processes are started once the time limit is reached.
        if self.timed_out {
            return Ok(1);
        }

        match command {
            ShellCommand::Pipeline(pipeline) => self
                .execute_pipeline(pipeline, env)
                .await
                .map_err(|e| e.with_command(first_command(command))),
            ShellCommand::Sequence(sequence) => match sequence.op {
                SequenceOperator::Semicolon => {
                    self.execute_command(&sequence.lhs, env).await?;
                    self.execute_command(&sequence.rhs, env).await
                }
                SequenceOperator::And => {
                    let result = self.execute_command(&sequence.lhs, env).await?;
                    if result == 0 {
                        self.execute_command(&sequence.rhs, env).await
                    } else {
                        Ok(result)
                    }
                }
                SequenceOperator::Or => {
                    let result = self.execute_command(&sequence.lhs, env).await?;
                    if result != 0 {
                        self.execute_command(&sequence.rhs, env).await
                    } else {
                        Ok(result)
                    }
                }
                SequenceOperator::Async => Err(ShellError {
                    command: Some(first_command(&sequence.lhs).clone()),
                    error: error::Error::UnsupportedOperator(sequence.op.to_string()),
                }),
            },
        }
    }

    async fn execute_pipeline(
        &mut self,
        pipeline: &ast::Pipeline,
        env: &mut ShellEnvironment,
    ) -> Result<i32, ShellError> {
        let mut stages = vec![];
        for command in &pipeline.commands {
            let stage = prepare_stage(command, env).map_err(|e| e.with_command(command))?;
            stages.push(stage);
        }

        let builtins = self.builtins;
        let in_pipeline = stages.len() > 1;

        for stage in &stages {
            let name = stage.args[0].as_str();
            let Some(registration) = builtins.get(name) else {
                continue;
            };

            // Host executables stand in for some builtins within pipelines.
            if in_pipeline && registration.external_in_pipeline {
                continue;
            }

            let error = if in_pipeline {
                format!("Unsupported: '{name}' cannot be part of a pipeline")
            } else if stage.env.is_some() {
                format!("Error: 'env' cannot call '{name}'")
            } else if stage.nots.iter().any(|crash| *crash) {
                format!("Error: 'not --crash' cannot call '{name}'")
            } else {
                continue;
            };

            return Err(internal_error(error).with_command(stage.command));
        }

        let exit_code = match stages.as_slice() {
            [stage] => match builtins.get(&stage.args[0]) {
                Some(registration) => self.execute_builtin(stage, registration, env)?,
                None => self.execute_processes(&stages, env, pipeline.pipefail).await?,
            },
            _ => self.execute_processes(&stages, env, pipeline.pipefail).await?,
        };

        if pipeline.negate {
            Ok(i32::from(exit_code == 0))
        } else {
            Ok(exit_code)
        }
    }

    fn execute_builtin(
        &mut self,
        stage: &Stage<'_>,
        registration: &Registration,
        env: &mut ShellEnvironment,
    ) -> Result<i32, ShellError> {
        tracing::debug!(target: trace_categories::COMMANDS, "builtin: {:?}", stage.args);

        let mut files = vec![];
        let slots = open_redirects(stage.command, &env.cwd, &mut files)
            .map_err(|e| e.with_command(stage.command))?;

        let mut context = BuiltinContext::new(env);
        let exit_code = (registration.execute_func)(&mut context, stage.args.clone())
            .map_err(|e| ShellError::from(e).with_command(stage.command))?;

        let BuiltinContext { stdout, stderr, .. } = context;

        let mut result = CommandResult::new(stage.command.clone());
        for (data, slot) in [(stdout, slots[1]), (stderr, slots[2])] {
            match slot {
                Slot::Stdout => result.stdout.push_str(&String::from_utf8_lossy(&data)),
                Slot::Stderr => result.stderr.push_str(&String::from_utf8_lossy(&data)),
                Slot::File(index) => files[index].file.write_all(&data)?,
                Slot::Stdin => (),
            }
        }

        result.exit_code = apply_nots(i32::from(exit_code), &stage.nots);
        if result.exit_code != 0 {
            result.output_files = read_output_files(&files);
        }

        let exit_code = result.exit_code;
        self.results.push(result);

        Ok(exit_code)
    }

    async fn execute_processes(
        &mut self,
        stages: &[Stage<'_>],
        env: &ShellEnvironment,
        pipefail: bool,
    ) -> Result<i32, ShellError> {
        let mut files = vec![];
        let mut slots = vec![];
        for stage in stages {
            let cwd = &stage.env.as_ref().unwrap_or(env).cwd;
            let stage_slots = open_redirects(stage.command, cwd, &mut files)
                .map_err(|e| e.with_command(stage.command))?;
            slots.push(stage_slots);
        }

        let stdout_capture = Capture::new()?;
        let mut stderr_captures = vec![];
        let mut children = vec![];
        let mut next_stdin: Option<os_pipe::PipeReader> = None;

        for (i, (stage, slots)) in stages.iter().zip(&slots).enumerate() {
            let stage_env = stage.env.as_ref().unwrap_or(env);

            let executable = resolve_executable(&stage.args[0], stage_env)
                .map_err(|e| ShellError::from(e).with_command(stage.command))?;

            tracing::debug!(
                target: trace_categories::COMMANDS,
                "spawning: {} {:?}",
                executable.display(),
                &stage.args[1..]
            );

            let stderr_capture = Capture::new()?;
            let previous_stdout = next_stdin.take();

            let stdout_default = if i + 1 == stages.len() {
                Sink::Pipe(stdout_capture.writer()?)
            } else {
                let (reader, writer) = os_pipe::pipe()?;
                next_stdin = Some(reader);
                Sink::Pipe(writer)
            };
            let stderr_default = Sink::Pipe(stderr_capture.writer()?);

            let connect = |slot: Slot| -> std::io::Result<Stdio> {
                match slot {
                    Slot::Stdout => stdout_default.stdio(),
                    Slot::Stderr => stderr_default.stdio(),
                    Slot::File(index) => Ok(files[index].file.try_clone()?.into()),
                    Slot::Stdin => Ok(Stdio::null()),
                }
            };

            let stdin = match slots[0] {
                Slot::File(index) => files[index].file.try_clone()?.into(),
                _ => previous_stdout.map_or_else(Stdio::null, Stdio::from),
            };

            let mut command = tokio::process::Command::new(&executable);
            command
                .args(&stage.args[1..])
                .current_dir(&stage_env.cwd)
                .env_clear()
                .envs(&stage_env.env)
                .stdin(stdin)
                .stdout(connect(slots[1])?)
                .stderr(connect(slots[2])?);

            let child = ChildProcess::spawn(&mut command).map_err(|e| {
                internal_error(format!(
                    "Could not create process ({}) due to {e}",
                    executable.display()
                ))
                .with_command(stage.command)
            })?;

            // Our copies of the write ends must be closed for readers to see end-of-file.
            drop(command);
            drop(stdout_default);
            drop(stderr_default);

            children.push(child);
            stderr_captures.push(stderr_capture);
        }

        // The last files handed to children are only held by them from here on.
        let stdout = stdout_capture.collect();
        let stderrs = futures::future::try_join_all(stderr_captures.into_iter().map(Capture::collect));

        let mut statuses: Vec<ExitStatus> = vec![];
        for child in &mut children {
            let (status, timed_out) = child.wait_until(self.deadline).await?;
            self.timed_out |= timed_out;
            statuses.push(status);
        }

        let mut outputs = std::pin::pin!(futures::future::try_join(stdout, stderrs));
        let (stdout, stderrs) = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, outputs.as_mut()).await {
                Ok(outputs) => outputs.map_err(error::Error::from)?,
                Err(_elapsed) => {
                    // Descendants still hold the output pipes open.
                    for child in &mut children {
                        child.kill_tree();
                    }
                    self.timed_out = true;
                    outputs.await.map_err(error::Error::from)?
                }
            },
            None => outputs.await.map_err(error::Error::from)?,
        };

        let stdout = stdout?;
        let mut exit_code = 0;

        for (i, (stage, (status, stderr))) in stages
            .iter()
            .zip(statuses.into_iter().zip(stderrs))
            .enumerate()
        {
            let mut result = CommandResult::new(stage.command.clone());

            if i + 1 == stages.len() {
                result.stdout = String::from_utf8_lossy(&stdout).to_string();
            }
            result.stderr = String::from_utf8_lossy(&stderr?).to_string();
            result.exit_code = apply_nots(processes::exit_code(status), &stage.nots);
            result.timed_out = self.timed_out;

            if result.exit_code != 0 {
                result.output_files = read_output_files(&files);
            }

            if !pipefail || result.exit_code != 0 {
                exit_code = result.exit_code;
            }

            self.results.push(result);
        }

        Ok(exit_code)
    }

    fn deadline_reached(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
    }
}

fn first_command(command: &ShellCommand) -> &ast::Command {
    match command {
        ShellCommand::Pipeline(pipeline) => &pipeline.commands[0],
        ShellCommand::Sequence(sequence) => first_command(&sequence.lhs),
    }
}

/// Strips the `env`, `not` and `!` prefixes from a command and expands its arguments.
fn prepare_stage<'a>(
    command: &'a ast::Command,
    env: &ShellEnvironment,
) -> Result<Stage<'a>, ShellError> {
    let mut args = command.args.as_slice();
    let mut stage_env: Option<ShellEnvironment> = None;
    let mut nots = vec![];

    while let Some(first) = args.first() {
        match first.as_str() {
            "env" => {
                let target = stage_env.get_or_insert_with(|| env.clone());
                args = apply_env_assignments(target, &args[1..]);
                if args.is_empty() {
                    return Err(internal_error("Error: 'env' requires a subcommand"));
                }
            }
            "not" => {
                args = &args[1..];
                let crash = args.first().is_some_and(|arg| arg.as_str() == "--crash");
                if crash {
                    args = &args[1..];
                }
                nots.push(crash);
                if args.is_empty() {
                    return Err(internal_error("Error: 'not' requires a subcommand"));
                }
            }
            "!" => {
                args = &args[1..];
                nots.push(false);
                if args.is_empty() {
                    return Err(internal_error("Error: '!' requires a subcommand"));
                }
            }
            _ => break,
        }
    }

    let cwd = &stage_env.as_ref().unwrap_or(env).cwd;
    let args = expand_arguments(args, cwd)?;

    Ok(Stage {
        command,
        args,
        env: stage_env,
        nots,
    })
}

/// Applies the `-u NAME` and `NAME=VALUE` arguments of an `env` prefix, returning the
/// arguments that follow them.
fn apply_env_assignments<'a>(env: &mut ShellEnvironment, args: &'a [Argument]) -> &'a [Argument] {
    let mut unset_next = false;

    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_str();

        if unset_next {
            env.env.remove(arg);
            unset_next = false;
            continue;
        }

        if arg == "-u" {
            unset_next = true;
            continue;
        }

        let Some((name, value)) = arg.split_once('=') else {
            return &args[i..];
        };

        env.env.insert(name.to_owned(), value.to_owned());
    }

    &[]
}

/// Expands glob arguments after the command name. Matches are absolute and sorted; a pattern
/// that matches nothing is passed through as written.
fn expand_arguments(args: &[Argument], cwd: &Path) -> Result<Vec<String>, ShellError> {
    let mut expanded = vec![];

    for (i, arg) in args.iter().enumerate() {
        if i == 0 || !arg.is_glob() {
            expanded.push(arg.as_str().to_owned());
        } else {
            expanded.extend(expand_glob(arg.as_str(), cwd)?);
        }
    }

    Ok(expanded)
}

fn expand_glob(pattern: &str, cwd: &Path) -> Result<Vec<String>, ShellError> {
    let full_pattern = if Path::new(pattern).is_absolute() {
        pattern.to_owned()
    } else {
        let cwd = glob::Pattern::escape(&cwd.to_string_lossy());
        format!("{cwd}{}{pattern}", std::path::MAIN_SEPARATOR)
    };

    let mut matches: Vec<String> = glob::glob(&full_pattern)
        .map_err(error::Error::from)?
        .filter_map(Result::ok)
        .map(|path| path.to_string_lossy().to_string())
        .collect();

    if matches.is_empty() {
        return Ok(vec![pattern.to_owned()]);
    }

    matches.sort();
    Ok(matches)
}

/// Resolves a command name to an executable, searching the environment's `PATH`. Names with
/// a path separator are resolved against the working directory.
fn resolve_executable(name: &str, env: &ShellEnvironment) -> Result<PathBuf, error::Error> {
    let path = env.env.get("PATH").map(String::as_str).unwrap_or_default();

    which::which_in(name, Some(path), &env.cwd)
        .map_err(|_| error::Error::CommandNotFound(name.to_owned()))
}

/// Processes a command's redirects, opening the files they name. Returns the slots that
/// standard input, output and error are connected to.
fn open_redirects(
    command: &ast::Command,
    cwd: &Path,
    files: &mut Vec<OpenedFile>,
) -> Result<[Slot; 3], ShellError> {
    let mut slots = [Slot::Stdin, Slot::Stdout, Slot::Stderr];

    for redirect in &command.redirects {
        let target = redirect.target.as_str();

        match (redirect.op, redirect.fd) {
            (Operator::RedirectOutput, None | Some(1)) => {
                slots[1] = open_file(&redirect.target, FileMode::Write, cwd, files)?;
            }
            (Operator::AppendOutput, None | Some(1)) => {
                slots[1] = open_file(&redirect.target, FileMode::Append, cwd, files)?;
            }
            (Operator::RedirectOutput, Some(2)) => {
                slots[2] = open_file(&redirect.target, FileMode::Write, cwd, files)?;
            }
            (Operator::AppendOutput, Some(2)) => {
                slots[2] = open_file(&redirect.target, FileMode::Append, cwd, files)?;
            }
            (Operator::RedirectInput, None | Some(0)) => {
                slots[0] = open_file(&redirect.target, FileMode::Read, cwd, files)?;
            }
            (Operator::DuplicateOutput, Some(2)) if matches!(target, "1" | "2") => {
                if target == "1" {
                    slots[2] = slots[1];
                }
            }
            (Operator::DuplicateOutput, None | Some(1)) if matches!(target, "1" | "2") => {
                if target == "2" {
                    slots[1] = slots[2];
                }
            }
            (Operator::DuplicateOutput | Operator::RedirectOutputAndError, None) => {
                let slot = open_file(&redirect.target, FileMode::Write, cwd, files)?;
                slots[1] = slot;
                slots[2] = slot;
            }
            _ => {
                return Err(ShellError::from(error::Error::Unsupported(format!(
                    "Unsupported redirect: '{redirect}'"
                ))));
            }
        }
    }

    Ok(slots)
}

fn open_file(
    target: &Argument,
    mode: FileMode,
    cwd: &Path,
    files: &mut Vec<OpenedFile>,
) -> Result<Slot, ShellError> {
    let name = if target.is_glob() {
        let mut names = expand_glob(target.as_str(), cwd)?;
        if names.len() != 1 {
            return Err(ShellError::from(error::Error::Unsupported(String::from(
                "Unsupported: glob in redirect expanded to multiple files",
            ))));
        }
        names.remove(0)
    } else {
        target.as_str().to_owned()
    };

    let path = if cfg!(windows) && name == "/dev/null" {
        PathBuf::from("NUL")
    } else {
        cwd.join(&name)
    };

    let file = match mode {
        FileMode::Read => std::fs::File::open(&path)?,
        FileMode::Write => std::fs::File::create(&path)?,
        FileMode::Append => std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?,
    };

    files.push(OpenedFile {
        name: target.as_str().to_owned(),
        path,
        mode,
        file,
    });

    Ok(Slot::File(files.len() - 1))
}

/// Reads back the files written through redirects, ordered by name.
fn read_output_files(files: &[OpenedFile]) -> Vec<(String, Vec<u8>)> {
    let mut output_files: Vec<(String, Vec<u8>)> = files
        .iter()
        .filter(|f| f.mode != FileMode::Read)
        .filter_map(|f| {
            std::fs::read(&f.path)
                .ok()
                .map(|data| (f.name.clone(), data))
        })
        .collect();

    output_files.sort_by(|a, b| a.0.cmp(&b.0));
    output_files.dedup_by(|a, b| a.0 == b.0);
    output_files
}

/// Applies `not` prefixes to an exit code, innermost first. `not` succeeds when its command
/// fails without crashing; `not --crash` succeeds only when its command crashed.
fn apply_nots(mut exit_code: i32, nots: &[bool]) -> i32 {
    for expect_crash in nots.iter().rev() {
        let crashed = exit_code < 0;
        exit_code = if *expect_crash {
            i32::from(!crashed)
        } else {
            i32::from(crashed || exit_code == 0)
        };
    }

    exit_code
}
