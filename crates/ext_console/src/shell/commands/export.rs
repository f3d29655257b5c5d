//! Export command implementation
//!
//! Sets environment variables that are passed to child processes.

use anyhow::bail;

use super::{
    is_valid_name, shell_escape, split_assignment, CommandOutput, FutureCommandResult,
    ShellCommand, ShellCommandContext,
};
use crate::shell::types::EnvChange;

/// The `export` command - sets environment variables.
pub struct ExportCommand;

impl ShellCommand for ExportCommand {
    fn name(&self) -> &str {
        "export"
    }

    fn summary(&self) -> &str {
        "Set or list environment variables"
    }

    fn usage(&self) -> &str {
        "export [NAME[=value]...]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            if context.args.is_empty() {
                // No arguments - list all exported variables
                let listing: Vec<String> = context
                    .shell
                    .environment
                    .iter()
                    .map(|(key, value)| format!("export {}={}", key, shell_escape(value)))
                    .collect();
                return Ok(CommandOutput::text(listing.join("\n")));
            }

            let mut changes = Vec::new();
            for arg in &context.args {
                let (name, value) = match split_assignment(arg) {
                    // NAME=value format
                    Some((name, value)) => (name, value.to_string()),
                    // Just NAME - promote shell var to env var
                    None => (
                        arg.as_str(),
                        context.shell.get_var(arg).unwrap_or_default().to_string(),
                    ),
                };
                if !is_valid_name(name) {
                    bail!("'{}': not a valid identifier", arg);
                }
                changes.push(EnvChange::SetEnvVar(name.to_string(), value));
            }

            Ok(CommandOutput::changes(changes))
        })
    }
}
