//! Cd command implementation
//!
//! Changes the current working directory.

use anyhow::bail;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};
use crate::shell::types::EnvChange;

/// The `cd` command - changes the current working directory.
pub struct CdCommand;

impl ShellCommand for CdCommand {
    fn name(&self) -> &str {
        "cd"
    }

    fn summary(&self) -> &str {
        "Change the working directory"
    }

    fn usage(&self) -> &str {
        "cd [dir | - | ~]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let target = match context.arg(0) {
                // No argument - go to home directory
                None => context.shell.home_directory.clone(),
                // cd - : go to previous directory
                Some("-") => match context.shell.get_var("OLDPWD") {
                    Some(old) => context.shell.resolve_path(old),
                    None => bail!("OLDPWD not set"),
                },
                Some(path) => context.shell.resolve_path(path),
            };

            let exists = context
                .services
                .adapter
                .directory_exists(target.clone())
                .await;
            if !exists {
                bail!("{}: No such directory", target.display());
            }

            let mut output = CommandOutput::changes(vec![EnvChange::Cd(target.clone())]);
            if context.arg(0) == Some("-") {
                output.output = target.display().to_string();
            }
            Ok(output)
        })
    }
}
