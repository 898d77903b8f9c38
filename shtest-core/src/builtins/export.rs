use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Set an environment variable for the remaining commands of the script.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct ExportCommand {
    /// Assignment of the form `NAME=VALUE`.
    #[arg(allow_hyphen_values = true)]
    assignments: Vec<String>,
}

impl builtins::Command for ExportCommand {
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        let [assignment] = self.assignments.as_slice() else {
            return Err(error::Error::Unsupported(String::from(
                "Unsupported: 'export' supports only one argument",
            )));
        };

        // Exporting an existing variable by name is a no-op; all variables are exported.
        if let Some((name, value)) = assignment.split_once('=') {
            context.env.env.insert(name.to_owned(), value.to_owned());
        }

        Ok(ExitCode::Success)
    }
}
