//! Echo command implementation
//!
//! Prints its arguments, optionally without trailing newline (-n).

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};

/// The `echo` command - prints arguments.
pub struct EchoCommand;

impl ShellCommand for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    fn summary(&self) -> &str {
        "Print arguments"
    }

    fn usage(&self) -> &str {
        "echo [-n] [text...]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            // Only a leading -n is a flag; anything later is printed.
            let no_newline = context.arg(0) == Some("-n");
            let words = if no_newline {
                &context.args[1..]
            } else {
                &context.args[..]
            };

            let output = CommandOutput::text(words.join(" "));
            Ok(if no_newline {
                output.without_newline()
            } else {
                output
            })
        })
    }
}
