use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Change the working directory of the script.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct CdCommand {
    /// Directory to change to; relative paths are resolved against the current directory.
    #[arg(allow_hyphen_values = true)]
    target_dirs: Vec<String>,
}

impl builtins::Command for CdCommand {
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        let [target_dir] = self.target_dirs.as_slice() else {
            return Err(error::Error::Unsupported(String::from(
                "Unsupported: 'cd' supports only one argument",
            )));
        };

        // The target isn't checked for existence; a bad directory surfaces in the next
        // command that runs there.
        context.env.cwd = context.absolute_path(target_dir);

        Ok(ExitCode::Success)
    }
}
