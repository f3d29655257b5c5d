//! Pwd command implementation
//!
//! Prints the current working directory.

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};

/// The `pwd` command - prints current working directory.
pub struct PwdCommand;

impl ShellCommand for PwdCommand {
    fn name(&self) -> &str {
        "pwd"
    }

    fn summary(&self) -> &str {
        "Print the working directory"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move { Ok(CommandOutput::text(context.shell.cwd().display().to_string())) })
    }
}
