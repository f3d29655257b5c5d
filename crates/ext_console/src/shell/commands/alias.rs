//! Alias and unalias commands
//!
//! Aliases are expanded by the orchestrator, one level deep, when their
//! name is the first token of a line.

use anyhow::bail;

use super::{
    is_valid_name, shell_escape, CommandOutput, FutureCommandResult, ShellCommand,
    ShellCommandContext,
};
use crate::shell::types::EnvChange;

/// The `alias` command - defines or lists aliases.
pub struct AliasCommand;

impl ShellCommand for AliasCommand {
    fn name(&self) -> &str {
        "alias"
    }

    fn summary(&self) -> &str {
        "Define or list aliases"
    }

    fn usage(&self) -> &str {
        "alias [name[=expansion...]]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let aliases = &context.shell.aliases;
            if context.args.is_empty() {
                let listing: Vec<String> = aliases
                    .iter()
                    .map(|(name, expansion)| format_alias(name, expansion))
                    .collect();
                return Ok(CommandOutput::text(listing.join("\n")));
            }

            // `alias ll=ls -la` arrives as ["ll=ls", "-la"].
            let definition = context.args.join(" ");
            let Some((name, expansion)) = definition.split_once('=') else {
                return match aliases.get(&definition) {
                    Some(expansion) => Ok(CommandOutput::text(format_alias(&definition, expansion))),
                    None => bail!("{}: not found", definition),
                };
            };

            if !is_valid_name(name) {
                bail!("'{}': invalid alias name", name);
            }
            if expansion.trim().is_empty() {
                bail!("{}: empty expansion", name);
            }

            Ok(CommandOutput::changes(vec![EnvChange::SetAlias(
                name.to_string(),
                expansion.trim().to_string(),
            )]))
        })
    }
}

/// The `unalias` command - removes aliases.
pub struct UnaliasCommand;

impl ShellCommand for UnaliasCommand {
    fn name(&self) -> &str {
        "unalias"
    }

    fn summary(&self) -> &str {
        "Remove aliases"
    }

    fn usage(&self) -> &str {
        "unalias name..."
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            if context.args.is_empty() {
                bail!("not enough arguments");
            }

            let mut changes = Vec::with_capacity(context.args.len());
            for name in &context.args {
                if !context.shell.aliases.contains_key(name) {
                    bail!("{}: not found", name);
                }
                changes.push(EnvChange::UnsetAlias(name.clone()));
            }
            Ok(CommandOutput::changes(changes))
        })
    }
}

fn format_alias(name: &str, expansion: &str) -> String {
    format!("alias {}={}", name, shell_escape(expansion))
}

#[cfg(test)]
mod tests {
    use crate::shell::testing::Harness;
    use crate::shell::types::EnvChange;

    #[tokio::test]
    async fn test_alias_define() {
        let harness = Harness::new();

        let out = harness.run("alias ll=ls -la").await;
        assert_eq!(
            out.changes,
            vec![EnvChange::SetAlias("ll".into(), "ls -la".into())]
        );

        let out = harness.run("alias 'probe=echo ping'").await;
        assert_eq!(
            out.changes,
            vec![EnvChange::SetAlias("probe".into(), "echo ping".into())]
        );
    }

    #[tokio::test]
    async fn test_alias_show_and_list() {
        let mut harness = Harness::new();
        harness.context.apply_changes(&[
            EnvChange::SetAlias("ll".into(), "ls -la".into()),
            EnvChange::SetAlias("g".into(), "grep".into()),
        ]);

        assert_eq!(harness.run("alias").await.output, "alias g=grep\nalias ll='ls -la'");
        assert_eq!(harness.run("alias ll").await.output, "alias ll='ls -la'");

        let out = harness.run("alias nope").await;
        assert_eq!(out.error.as_deref(), Some("alias: nope: not found"));
    }

    #[tokio::test]
    async fn test_alias_rejects_bad_definitions() {
        let harness = Harness::new();
        assert_eq!(
            harness.run("alias 1x=y").await.error.as_deref(),
            Some("alias: '1x': invalid alias name")
        );
        assert_eq!(
            harness.run("alias empty=").await.error.as_deref(),
            Some("alias: empty: empty expansion")
        );
    }

    #[tokio::test]
    async fn test_unalias() {
        let mut harness = Harness::new();
        harness
            .context
            .apply_change(&EnvChange::SetAlias("ll".into(), "ls -la".into()));

        let out = harness.run("unalias ll").await;
        assert_eq!(out.changes, vec![EnvChange::UnsetAlias("ll".into())]);

        let out = harness.run("unalias ll gone").await;
        assert_eq!(out.error.as_deref(), Some("unalias: gone: not found"));
        assert!(out.changes.is_empty());
    }
}
