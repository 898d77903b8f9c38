use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// No-op command.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct ColonCommand {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    _args: Vec<String>,
}

impl builtins::Command for ColonCommand {
    fn execute(&self, _context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        Ok(ExitCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use crate::builtins::ExitCode;
    use crate::builtins::testing::{env_in, invoke};
    use std::path::Path;

    #[test]
    fn always_succeeds() {
        let mut env = env_in(Path::new("/"));
        let result = invoke(&mut env, &[":", "-x", "anything"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));
        assert!(result.stdout.is_empty());
    }
}
