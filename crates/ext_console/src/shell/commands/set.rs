//! Set command implementation
//!
//! Sets shell-local variables, which are not passed to child processes
//! unless exported.

use anyhow::bail;

use super::{
    is_valid_name, shell_escape, split_assignment, CommandOutput, FutureCommandResult,
    ShellCommand, ShellCommandContext,
};
use crate::shell::types::EnvChange;

/// The `set` command - sets or lists shell variables.
pub struct SetCommand;

impl ShellCommand for SetCommand {
    fn name(&self) -> &str {
        "set"
    }

    fn summary(&self) -> &str {
        "Set or list shell variables"
    }

    fn usage(&self) -> &str {
        "set [NAME=value | NAME value...]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let Some(first) = context.arg(0) else {
                let listing: Vec<String> = context
                    .shell
                    .shell_variables
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, shell_escape(value)))
                    .collect();
                return Ok(CommandOutput::text(listing.join("\n")));
            };

            // `set NAME=value` or `set NAME word...`
            let (name, value) = match split_assignment(first) {
                Some((name, value)) => (name, value.to_string()),
                None => (first, context.args[1..].join(" ")),
            };
            if !is_valid_name(name) {
                bail!("'{}': not a valid identifier", name);
            }

            Ok(CommandOutput::changes(vec![EnvChange::SetShellVar(
                name.to_string(),
                value,
            )]))
        })
    }
}
