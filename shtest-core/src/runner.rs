//! Running a single test: directive parsing, substitution, execution through the internal
//! interpreter or an external shell, retries, and transcript assembly.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Instant;

use futures::FutureExt;
use itertools::Itertools;
use shtest_parser::ParserOptions;
use shtest_parser::ast::{SequenceOperator, ShellCommand};

use crate::builtins::BuiltinRegistry;
use crate::config::RunnerConfig;
use crate::directives::{KeywordRegistry, ParsedScript};
use crate::interp::{CommandResult, ShellEnvironment, ShellExecutor};
use crate::results::{ResultCode, TestResult};
use crate::substitutions::{
    apply_substitutions, default_substitutions, expand_debug_markers, temp_paths,
};
use crate::test::TestCase;
use crate::{error, processes, trace_categories};

/// Redirected output beyond this many bytes is truncated in transcripts.
const MAX_REDIRECTED_OUTPUT: usize = 1024;

/// Runs a test with the format configured for it and records its result. Errors and panics
/// raised while running the test become an unresolved result.
///
/// # Arguments
///
/// * `test` - The test to run.
/// * `runner` - The run's global options.
pub async fn execute_test(test: &mut TestCase, runner: &RunnerConfig) -> Result<(), error::Error> {
    let started = Instant::now();

    let result = match test.config.test_format.clone() {
        Some(format) => {
            let execution = std::panic::AssertUnwindSafe(format.execute(test, runner))
                .catch_unwind()
                .await;

            match execution {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => TestResult::new(
                    ResultCode::Unresolved,
                    format!("Exception during script execution:\n{e}\n"),
                ),
                Err(panic) => TestResult::new(
                    ResultCode::Unresolved,
                    format!(
                        "Exception during script execution:\n{}\n",
                        panic_message(panic.as_ref())
                    ),
                ),
            }
        }
        None => TestResult::new(
            ResultCode::Unresolved,
            format!("no test format configured for {}", test.full_name()),
        ),
    };

    let mut result = result;
    result.elapsed = Some(started.elapsed());

    tracing::debug!(
        target: trace_categories::DISPATCH,
        "{}: {} ({:?})",
        test.full_name(),
        result.code,
        result.elapsed
    );

    test.set_result(result)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("test panicked")
    }
}

/// What running a script once produced.
struct Execution {
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
}

/// Runs a shell test: parses its directives, applies substitutions, and executes the
/// resulting script, retrying failures as configured.
///
/// # Arguments
///
/// * `test` - The test to run.
/// * `runner` - The run's global options.
/// * `keywords` - The directive keywords recognized in the test file.
/// * `builtins` - The internal shell's built-in commands.
/// * `external` - Whether the script runs in an external shell.
pub(crate) async fn execute_sh_test(
    test: &mut TestCase,
    runner: &RunnerConfig,
    keywords: &KeywordRegistry,
    builtins: &BuiltinRegistry,
    external: bool,
) -> Result<TestResult, error::Error> {
    if test.config.unsupported {
        return Ok(TestResult::new(ResultCode::Unsupported, "Test is unsupported"));
    }

    let script = match keywords.parse_test(test, true)? {
        ParsedScript::Runnable(script) => script,
        ParsedScript::Finished(result) => return Ok(result),
    };

    if runner.no_execute {
        return Ok(TestResult::new(ResultCode::Pass, ""));
    }

    let (tmp_dir, tmp_base) = temp_paths(test);
    std::fs::create_dir_all(&tmp_dir)?;

    let substitutions =
        default_substitutions(test, &tmp_dir, &tmp_base, &runner.interpreter(), external);
    let commands: Vec<String> = apply_substitutions(&script.commands, &substitutions)
        .iter()
        .map(|line| expand_debug_markers(line))
        .collect();

    let retries = script
        .allowed_retries
        .or(runner.max_retries_per_test)
        .unwrap_or(test.config.test_retry_attempts);
    let attempts = retries.saturating_add(1);

    let mut result = TestResult::new(ResultCode::Unresolved, "");
    for attempt in 0..attempts {
        result = if external {
            execute_external(test, runner, &commands, &tmp_base).await?
        } else {
            execute_internal(test, runner, builtins, &commands).await?
        };

        if result.code != ResultCode::Fail {
            if attempt > 0 && result.code == ResultCode::Pass {
                result.code = ResultCode::FlakyPass;
            }
            break;
        }

        if attempt + 1 < attempts {
            tracing::debug!(
                target: trace_categories::DISPATCH,
                "{}: retrying after failed attempt {}",
                test.full_name(),
                attempt + 1
            );
        }
    }

    Ok(result)
}

async fn execute_internal(
    test: &TestCase,
    runner: &RunnerConfig,
    builtins: &BuiltinRegistry,
    commands: &[String],
) -> Result<TestResult, error::Error> {
    let options = ParserOptions::builder()
        .pipefail(test.config.pipefail)
        .win32_escapes(cfg!(windows))
        .build();

    let mut script: Option<ShellCommand> = None;
    for line in commands {
        let command = match shtest_parser::parse_str(line, &options) {
            Ok(command) => command,
            Err(e) => {
                return Ok(TestResult::new(
                    ResultCode::Unresolved,
                    format!("shell parser error on: {line:?}\n{e}"),
                ));
            }
        };

        script = Some(match script {
            Some(previous) => ShellCommand::join(previous, SequenceOperator::And, command),
            None => command,
        });
    }

    let mut env = ShellEnvironment::new(exec_dir(test), test.config.environment.clone());
    let mut executor = ShellExecutor::new(builtins, runner.timeout);

    let exit_code = match &script {
        Some(script) => executor.execute(script, &mut env).await,
        None => 0,
    };

    let execution = Execution {
        stdout: format_transcript(executor.results()),
        stderr: String::new(),
        exit_code,
        timed_out: executor.timed_out(),
    };

    Ok(make_result(commands, &execution, runner))
}

async fn execute_external(
    test: &TestCase,
    runner: &RunnerConfig,
    commands: &[String],
    tmp_base: &Path,
) -> Result<TestResult, error::Error> {
    let mut script_path = tmp_base.as_os_str().to_owned();
    script_path.push(".script");

    let mut contents = String::new();
    if test.config.pipefail {
        contents.push_str("set -o pipefail;");
    }
    if runner.echo_all_commands {
        contents.push_str("set -x;");
    }
    if !commands.is_empty() {
        contents.push_str("{ ");
        contents.push_str(&commands.join("; } &&\n{ "));
        contents.push_str("; }");
    }
    contents.push('\n');

    std::fs::write(&script_path, contents)?;

    let shell = runner
        .bash_path()
        .unwrap_or_else(|| std::path::PathBuf::from("/bin/sh"));

    let mut command = tokio::process::Command::new(shell);
    command
        .arg(&script_path)
        .current_dir(exec_dir(test))
        .env_clear()
        .envs(&test.config.environment);

    let output = processes::run_to_completion(command, runner.timeout).await?;

    let execution = Execution {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        timed_out: output.timed_out,
    };

    Ok(make_result(commands, &execution, runner))
}

fn exec_dir(test: &TestCase) -> std::path::PathBuf {
    let exec_path = test.exec_path();
    exec_path
        .parent()
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf)
}

/// Classifies an execution and assembles the test's output from it.
fn make_result(commands: &[String], execution: &Execution, runner: &RunnerConfig) -> TestResult {
    let code = if execution.timed_out {
        ResultCode::Timeout
    } else if execution.exit_code == 0 {
        ResultCode::Pass
    } else {
        ResultCode::Fail
    };

    let mut output = format!(
        "Script:\n--\n{}\n--\nExit Code: {}\n",
        commands.join("\n"),
        execution.exit_code
    );

    if execution.timed_out {
        let seconds = runner.timeout.map_or(0, |t| t.as_secs());
        let _ = writeln!(output, "Reached timeout of {seconds} seconds");
    }
    output.push('\n');

    if !execution.stdout.is_empty() {
        let _ = write!(
            output,
            "Command Output (stdout):\n--\n{}\n--\n",
            execution.stdout
        );
    }
    if !execution.stderr.is_empty() {
        let _ = write!(
            output,
            "Command Output (stderr):\n--\n{}\n--\n",
            execution.stderr
        );
    }

    TestResult::new(code, output)
}

/// Renders the commands run by the internal shell the way a shell trace would show them.
fn format_transcript(results: &[CommandResult]) -> String {
    let mut out = String::new();

    for result in results {
        let _ = writeln!(
            out,
            "$ {}",
            result
                .command
                .args
                .iter()
                .map(|arg| format!("\"{}\"", arg.as_str()))
                .join(" ")
        );

        for (name, data) in &result.output_files {
            let _ = writeln!(out, "# redirected output from '{name}':");
            if data.len() > MAX_REDIRECTED_OUTPUT {
                out.push_str(&String::from_utf8_lossy(&data[..MAX_REDIRECTED_OUTPUT]));
                out.push_str("\n...\n");
                out.push_str("note: data was truncated\n");
            } else {
                out.push_str(&String::from_utf8_lossy(data));
            }
            out.push('\n');
        }

        let has_stdout = !result.stdout.trim().is_empty();
        let has_stderr = !result.stderr.trim().is_empty();

        if has_stdout {
            let _ = writeln!(out, "# command output:\n{}", result.stdout);
        }
        if has_stderr {
            let _ = writeln!(out, "# command stderr:\n{}", result.stderr);
        }
        if !has_stdout && !has_stderr {
            out.push_str("note: command had no output on stdout or stderr\n");
        }

        if result.exit_code != 0 {
            if result.timed_out {
                out.push_str("error: command reached timeout: True\n");
            } else {
                let _ = writeln!(
                    out,
                    "error: command failed with exit status: {}",
                    result.exit_code
                );
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, TestingConfig};
    use crate::formats::FormatRegistry;
    use crate::test::TestSuite;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use shtest_parser::ast::{Argument, Command};
    use std::sync::Arc;
    use std::time::Duration;

    fn make_test(root: &Path, name: &str, contents: &str, overrides: ConfigFile) -> Result<TestCase> {
        std::fs::write(root.join(name), contents)?;

        let runner = RunnerConfig::default();
        let formats = FormatRegistry::standard();
        let parent = Arc::new(TestingConfig::root(&runner));
        let config = Arc::new(TestingConfig::derive(
            &parent,
            ConfigFile {
                name: Some("suite".into()),
                suffixes: Some(vec!["txt".into()]),
                test_format: Some("sh".into()),
                ..overrides
            },
            &formats,
        )?);

        let suite = Arc::new(TestSuite {
            name: String::from("suite"),
            source_root: root.to_path_buf(),
            exec_root: root.to_path_buf(),
            config: Arc::clone(&config),
        });

        Ok(TestCase::new(suite, vec![name.to_owned()], config))
    }

    async fn run(test: &mut TestCase, runner: &RunnerConfig) -> Result<TestResult> {
        execute_test(test, runner).await?;
        Ok(test.result().cloned().unwrap_or_else(|| TestResult::new(ResultCode::Pass, "missing")))
    }

    #[test]
    fn transcripts() {
        let command = Command {
            args: vec![Argument::Word("cat".into()), Argument::Glob("*.txt".into())],
            redirects: vec![],
        };

        let mut failed = CommandResult {
            command,
            stdout: String::new(),
            stderr: String::from("cat: x: No such file\n"),
            exit_code: 1,
            timed_out: false,
            output_files: vec![(String::from("out"), b"partial".to_vec())],
        };

        let mut quiet = failed.clone();
        quiet.stderr.clear();
        quiet.exit_code = 0;
        quiet.output_files.clear();

        assert_eq!(
            format_transcript(std::slice::from_ref(&quiet)),
            "$ \"cat\" \"*.txt\"\nnote: command had no output on stdout or stderr\n"
        );

        assert_eq!(
            format_transcript(std::slice::from_ref(&failed)),
            "$ \"cat\" \"*.txt\"\n\
             # redirected output from 'out':\npartial\n\
             # command stderr:\ncat: x: No such file\n\n\
             error: command failed with exit status: 1\n"
        );

        failed.output_files = vec![(String::from("big"), vec![b'x'; MAX_REDIRECTED_OUTPUT + 10])];
        failed.timed_out = true;
        let transcript = format_transcript(&[failed]);
        assert!(transcript.contains("\n...\nnote: data was truncated\n"));
        assert!(transcript.ends_with("error: command reached timeout: True\n"));
    }

    #[tokio::test]
    async fn passing_internal_script() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "pass.txt",
            "# RUN: echo hello > %t\n# RUN: diff %t %t\n",
            ConfigFile::default(),
        )?;

        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Pass, "{}", result.output);
        assert!(result.elapsed.is_some());
        assert!(result.output.contains("Exit Code: 0\n"));
        assert!(result.output.contains(": 'RUN: at line 1'"));
        assert!(dir.path().join("Output").join("pass.txt.tmp").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn failing_internal_script() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "fail.txt",
            "# RUN: echo a > %t.a\n# RUN: echo b > %t.b\n# RUN: diff %t.a %t.b\n# RUN: echo never\n",
            ConfigFile::default(),
        )?;

        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Fail);
        assert!(result.output.contains("Exit Code: 1\n"));
        assert!(result.output.contains("error: command failed with exit status: 1"));
        assert!(result.output.contains("-a\n+b\n"));
        assert!(!result.output.contains("\"never\""));
        Ok(())
    }

    #[tokio::test]
    async fn parse_errors_are_unresolved() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "bad.txt",
            "# RUN: echo 'unterminated\n",
            ConfigFile::default(),
        )?;

        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Unresolved);
        assert!(result.output.starts_with("shell parser error on: "));
        Ok(())
    }

    #[tokio::test]
    async fn gating_and_dry_runs() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let mut test = make_test(dir.path(), "empty.txt", "no directives\n", ConfigFile::default())?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Unresolved);
        assert_eq!(result.output, "Test has no run line!");

        let mut test = make_test(
            dir.path(),
            "req.txt",
            "# REQUIRES: missing-feature\n# RUN: false\n",
            ConfigFile::default(),
        )?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Unsupported);

        let mut test = make_test(
            dir.path(),
            "unsupported.txt",
            "# RUN: false\n",
            ConfigFile {
                unsupported: Some(true),
                ..ConfigFile::default()
            },
        )?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Unsupported);

        let mut test = make_test(dir.path(), "dry.txt", "# RUN: false\n", ConfigFile::default())?;
        let result = run(&mut test, &RunnerConfig::default().with_no_execute(true)).await?;
        assert_eq!(result.code, ResultCode::Pass);
        assert!(!dir.path().join("Output").exists());
        Ok(())
    }

    #[tokio::test]
    async fn expected_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "xfail.txt",
            "# XFAIL: *\n# RUN: not echo x\n",
            ConfigFile::default(),
        )?;

        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Xfail);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn retries_make_flaky_passes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let script = "# RUN: sh -c 'if [ -f %t.seen ]; then exit 0; fi; touch %t.seen; exit 1'\n";

        let mut test = make_test(
            dir.path(),
            "flaky.txt",
            script,
            ConfigFile {
                test_retry_attempts: Some(2),
                ..ConfigFile::default()
            },
        )?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::FlakyPass, "{}", result.output);

        let mut test = make_test(
            dir.path(),
            "flaky2.txt",
            script,
            ConfigFile::default(),
        )?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Fail);

        let mut test = make_test(
            dir.path(),
            "flaky3.txt",
            &format!("# ALLOW_RETRIES: 1\n{script}"),
            ConfigFile::default(),
        )?;
        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::FlakyPass);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeouts_are_not_retried() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "slow.txt",
            "# RUN: echo start >> %t.count\n# RUN: sleep 30\n",
            ConfigFile {
                test_retry_attempts: Some(3),
                ..ConfigFile::default()
            },
        )?;

        let runner = RunnerConfig::default().with_timeout(Some(Duration::from_millis(300)));
        let result = run(&mut test, &runner).await?;
        assert_eq!(result.code, ResultCode::Timeout);
        assert!(result.output.contains("error: command reached timeout: True"));

        let count = std::fs::read_to_string(dir.path().join("Output").join("slow.txt.tmp.count"))?;
        assert_eq!(count, "start\n");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_shell() -> Result<()> {
        if RunnerConfig::default().bash_path().is_none() {
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let mut test = make_test(
            dir.path(),
            "ext.txt",
            "# RUN: echo $((1 + 2)) > %t\n# RUN: grep -q 3 %t\n# RUN: echo done\n",
            ConfigFile {
                test_format: Some("sh-external".into()),
                ..ConfigFile::default()
            },
        )?;

        let result = run(&mut test, &RunnerConfig::default()).await?;
        assert_eq!(result.code, ResultCode::Pass, "{}", result.output);
        assert!(result.output.contains("Command Output (stdout):\n--\ndone\n"));

        let script = std::fs::read_to_string(dir.path().join("Output").join("ext.txt.script"))?;
        assert!(script.starts_with("set -o pipefail;{ : 'RUN: at line 1'; "));
        assert!(script.contains("; } &&\n{ "));
        Ok(())
    }
}
