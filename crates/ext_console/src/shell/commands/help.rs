//! Help command implementation

use anyhow::bail;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};

/// The `help` command - lists built-ins or describes one.
pub struct HelpCommand;

impl ShellCommand for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn summary(&self) -> &str {
        "List built-in commands or describe one"
    }

    fn usage(&self) -> &str {
        "help [command]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let registry = &context.services.registry;

            if context.args.is_empty() {
                let commands = registry.commands();
                let width = commands.iter().map(|c| c.name().len()).max().unwrap_or(0);
                let listing: Vec<String> = commands
                    .iter()
                    .map(|c| format!("{:<width$}  {}", c.name(), c.summary(), width = width))
                    .collect();
                return Ok(CommandOutput::text(listing.join("\n")));
            }

            // Multi-word names: `help jobs clear`
            let Some((command, consumed)) = registry.resolve(&context.args) else {
                bail!("no help topics match '{}'", context.args.join(" "));
            };
            if consumed != context.args.len() {
                bail!("no help topics match '{}'", context.args.join(" "));
            }

            let mut text = format!("usage: {}\n{}", command.usage(), command.summary());
            if !command.aliases().is_empty() {
                text.push_str(&format!("\naliases: {}", command.aliases().join(", ")));
            }
            Ok(CommandOutput::text(text))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::shell::testing::Harness;

    #[tokio::test]
    async fn test_help_lists_every_builtin() {
        let harness = Harness::new();
        let out = harness.run("help").await;

        let names: Vec<&str> = out
            .output
            .lines()
            .filter_map(|line| line.split("  ").next())
            .map(str::trim)
            .collect();
        assert!(names.contains(&"cd"));
        assert!(names.contains(&"jobs clear"));
        assert_eq!(out.output.lines().count(), harness.services.registry.commands().len());
    }

    #[tokio::test]
    async fn test_help_for_command() {
        let harness = Harness::new();

        let out = harness.run("help sleep").await;
        assert_eq!(
            out.output,
            "usage: sleep <seconds>[s|m|h|d]\nPause for a number of seconds"
        );

        let out = harness.run("help history clear").await;
        assert!(out.output.starts_with("usage: history clear"));

        let out = harness.run("help frobnicate").await;
        assert_eq!(
            out.error.as_deref(),
            Some("help: no help topics match 'frobnicate'")
        );
    }
}
