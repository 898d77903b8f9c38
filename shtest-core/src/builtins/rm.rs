use std::io::Write;
use std::path::Path;

use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Remove files and directories.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct RmCommand {
    /// Ignore missing paths and make read-only files writable before removing them.
    #[arg(short = 'f')]
    force: bool,

    /// Remove directories and their contents.
    #[arg(short = 'r', short_alias = 'R', long = "recursive")]
    recursive: bool,

    /// Paths to remove.
    paths: Vec<String>,
}

impl builtins::Command for RmCommand {
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        if self.paths.is_empty() {
            return Err(error::Error::InternalShell(String::from(
                "Error: 'rm' is missing an operand",
            )));
        }

        let mut exit_code = ExitCode::Success;

        for path in &self.paths {
            let path = context.absolute_path(path);

            if self.force && std::fs::symlink_metadata(&path).is_err() {
                continue;
            }

            let is_dir = std::fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir());
            if is_dir && !self.recursive {
                writeln!(context.stderr, "Error: {} is a directory", path.display())?;
                exit_code = ExitCode::Failure;
                continue;
            }

            if let Err(e) = self.remove(&path) {
                writeln!(context.stderr, "Error: 'rm' command failed, {e}")?;
                exit_code = ExitCode::Failure;
            }
        }

        Ok(exit_code)
    }
}

impl RmCommand {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        let is_dir = std::fs::symlink_metadata(path)?.is_dir();

        if !is_dir {
            if self.force {
                make_writable(path)?;
            }
            return std::fs::remove_file(path);
        }

        match std::fs::remove_dir_all(path) {
            Err(e) if self.force && e.kind() == std::io::ErrorKind::PermissionDenied => {
                for entry in walkdir::WalkDir::new(path) {
                    let entry = entry.map_err(std::io::Error::other)?;
                    make_writable(entry.path())?;
                }
                std::fs::remove_dir_all(path)
            }
            result => result,
        }
    }
}

fn make_writable(path: &Path) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(());
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::fs::PermissionsExt;
            permissions.set_mode(permissions.mode() | 0o200);
        } else {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
        }
    }

    std::fs::set_permissions(path, permissions)
}
