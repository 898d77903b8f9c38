//! Process management

use std::io::Read;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use crate::error;

/// Tracks a spawned child process. The child leads its own process group, so that killing
/// it also takes down any processes it started.
pub(crate) struct ChildProcess {
    child: tokio::process::Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ChildProcess {
    /// Spawns the given command in a new process group.
    pub fn spawn(command: &mut tokio::process::Command) -> std::io::Result<Self> {
        #[cfg(unix)]
        command.process_group(0);
        command.kill_on_drop(true);

        let child = command.spawn()?;
        Ok(Self {
            pid: child.id(),
            child,
            reaped: false,
        })
    }

    /// Waits for the process to exit, killing its process tree if the deadline passes first.
    /// Returns the exit status and whether the deadline was reached.
    pub async fn wait_until(
        &mut self,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<(ExitStatus, bool), error::Error> {
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.child.wait()).await {
                Ok(status) => (status?, false),
                Err(_elapsed) => {
                    self.kill_tree();
                    (self.child.wait().await?, true)
                }
            },
            None => (self.child.wait().await?, false),
        };

        self.reaped = true;
        Ok(result)
    }

    /// Forcibly terminates the process along with the rest of its process group. The group
    /// is signaled even after the process itself has exited, to reach leftover descendants.
    pub fn kill_tree(&mut self) {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                if let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) {
                    let _ = nix::sys::signal::killpg(
                        nix::unistd::Pid::from_raw(pid),
                        nix::sys::signal::SIGKILL,
                    );
                }
            }
        }

        let _ = self.child.start_kill();
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_tree();
        }
    }
}

/// A pipe whose read end is drained into memory once all writers have been handed out.
pub(crate) struct Capture {
    reader: os_pipe::PipeReader,
    writer: os_pipe::PipeWriter,
}

impl Capture {
    pub fn new() -> std::io::Result<Self> {
        let (reader, writer) = os_pipe::pipe()?;
        Ok(Self { reader, writer })
    }

    /// Returns a new handle to the write end of the pipe.
    pub fn stdio(&self) -> std::io::Result<Stdio> {
        Ok(self.writer()?.into())
    }

    /// Returns a new handle to the write end of the pipe.
    pub fn writer(&self) -> std::io::Result<os_pipe::PipeWriter> {
        self.writer.try_clone()
    }

    /// Closes this process's write end and reads everything written to the pipe. Every
    /// handle returned by [`Capture::stdio`] must have been given away (and the commands
    /// holding them dropped) before the read can complete.
    pub fn collect(self) -> tokio::task::JoinHandle<std::io::Result<Vec<u8>>> {
        let Self { mut reader, writer } = self;
        drop(writer);

        tokio::task::spawn_blocking(move || {
            let mut buffer = vec![];
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    }
}

/// Returns the exit code for a process status; a process killed by a signal yields the
/// negated signal number.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::process::ExitStatusExt;
            status.signal().map_or(1, |signal| -signal)
        } else {
            1
        }
    }
}

/// Returns whether the given path is an executable file.
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };

    if !metadata.is_file() {
        return false;
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        } else {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    let ext = ext.to_ascii_lowercase();
                    ["exe", "bat", "cmd", "com"].contains(&ext.as_str())
                })
        }
    }
}

/// Output of a process run to completion.
pub(crate) struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Runs a command with no input, capturing its output. If a timeout is given and reached,
/// the command's process tree is killed.
pub(crate) async fn run_to_completion(
    mut command: tokio::process::Command,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, error::Error> {
    let stdout = Capture::new()?;
    let stderr = Capture::new()?;

    command
        .stdin(Stdio::null())
        .stdout(stdout.stdio()?)
        .stderr(stderr.stdio()?);

    let mut child = ChildProcess::spawn(&mut command)?;
    drop(command);

    let stdout = stdout.collect();
    let stderr = stderr.collect();

    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let (status, mut timed_out) = child.wait_until(deadline).await?;

    let mut outputs = std::pin::pin!(futures::future::try_join(stdout, stderr));
    let (stdout, stderr) = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, outputs.as_mut()).await {
            Ok(outputs) => outputs?,
            Err(_elapsed) => {
                // Descendants still hold the output pipes open.
                child.kill_tree();
                timed_out = true;
                outputs.await?
            }
        },
        None => outputs.await?,
    };
    let (stdout, stderr) = (stdout?, stderr?);

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code: exit_code(status),
        timed_out,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> tokio::process::Command {
        let mut command = tokio::process::Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn captures_output() -> Result<()> {
        let output = run_to_completion(sh("echo out; echo err >&2; exit 3"), None).await?;
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.timed_out);
        Ok(())
    }

    #[tokio::test]
    async fn kills_process_tree_on_timeout() -> Result<()> {
        let started = std::time::Instant::now();
        let output = run_to_completion(
            sh("sleep 30 & sleep 30; echo never"),
            Some(Duration::from_millis(200)),
        )
        .await?;

        assert!(output.timed_out);
        assert_eq!(output.stdout, "");
        assert!(started.elapsed() < Duration::from_secs(20));
        Ok(())
    }

    #[tokio::test]
    async fn signal_exit_codes() -> Result<()> {
        let output = run_to_completion(sh("kill -9 $$"), None).await?;
        assert_eq!(output.exit_code, -9);
        Ok(())
    }

    #[test]
    fn executables() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("x");
        std::fs::write(&path, "")?;
        assert!(!is_executable(&path));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        assert!(is_executable(&path));
        assert!(!is_executable(dir.path()));
        Ok(())
    }
}
