use std::io::Write;

use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Create directories.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct MkdirCommand {
    /// Accepted for compatibility; intermediate directories are always created.
    #[arg(short = 'p')]
    _parents: bool,

    /// Directories to create.
    paths: Vec<String>,
}

impl builtins::Command for MkdirCommand {
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        if self.paths.is_empty() {
            return Err(error::Error::InternalShell(String::from(
                "Error: 'mkdir' is missing an operand",
            )));
        }

        let mut exit_code = ExitCode::Success;

        for path in &self.paths {
            let path = context.absolute_path(path);
            if let Err(e) = std::fs::create_dir_all(&path) {
                writeln!(context.stderr, "Error: 'mkdir' command failed, {e}")?;
                exit_code = ExitCode::Failure;
            }
        }

        Ok(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use crate::builtins::ExitCode;
    use crate::builtins::testing::{env_in, invoke};
    use crate::error;
    use anyhow::Result;

    #[test]
    fn creates_nested_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["mkdir", "a/b/c", "d"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));
        assert!(dir.path().join("a/b/c").is_dir());
        assert!(dir.path().join("d").is_dir());

        // Existing directories are fine, with or without -p.
        let result = invoke(&mut env, &["mkdir", "d"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));
        let result = invoke(&mut env, &["mkdir", "-p", "a/b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));

        Ok(())
    }

    #[test]
    fn reports_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("file"), "")?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["mkdir", "-p", "file/sub", "ok"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert!(result.stderr.starts_with("Error: 'mkdir' command failed, "));
        assert!(dir.path().join("ok").is_dir());

        Ok(())
    }

    #[test]
    fn missing_operand() {
        let mut env = env_in(std::path::Path::new("/"));
        let result = invoke(&mut env, &["mkdir", "-p"]);
        assert!(matches!(
            result.exit_code,
            Err(error::Error::InternalShell(ref m)) if m == "Error: 'mkdir' is missing an operand"
        ));
    }
}
