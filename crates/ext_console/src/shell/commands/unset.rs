//! Unset command implementation
//!
//! Removes environment and shell variables.

use anyhow::bail;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};
use crate::shell::types::EnvChange;

/// The `unset` command - removes variables.
pub struct UnsetCommand;

impl ShellCommand for UnsetCommand {
    fn name(&self) -> &str {
        "unset"
    }

    fn summary(&self) -> &str {
        "Remove variables"
    }

    fn usage(&self) -> &str {
        "unset NAME..."
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            if context.args.is_empty() {
                bail!("not enough arguments");
            }

            let changes = context
                .args
                .iter()
                .map(|name| EnvChange::UnsetVar(name.clone()))
                .collect();
            Ok(CommandOutput::changes(changes))
        })
    }
}
