//! History commands: history, history clear

use anyhow::Context as _;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};

const DEFAULT_HISTORY_LINES: usize = 20;

/// The `history` command - shows recent command lines.
pub struct HistoryCommand;

impl ShellCommand for HistoryCommand {
    fn name(&self) -> &str {
        "history"
    }

    fn summary(&self) -> &str {
        "Show recent command lines"
    }

    fn usage(&self) -> &str {
        "history [n]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let limit = match context.arg(0) {
                Some(n) => n
                    .parse::<usize>()
                    .with_context(|| format!("{}: numeric argument required", n))?,
                None => DEFAULT_HISTORY_LINES,
            };

            let listing: Vec<String> = context
                .services
                .history
                .recent(limit)
                .iter()
                .map(|entry| format!("{:>5}  {}", entry.id, entry.line))
                .collect();
            Ok(CommandOutput::text(listing.join("\n")))
        })
    }
}

/// The `history clear` command - empties the history.
pub struct HistoryClearCommand;

impl ShellCommand for HistoryClearCommand {
    fn name(&self) -> &str {
        "history clear"
    }

    fn summary(&self) -> &str {
        "Clear the command history"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            context.services.history.clear();
            Ok(CommandOutput::empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::shell::history::HistoryEntry;
    use crate::shell::testing::Harness;

    fn record(harness: &Harness, line: &str) {
        harness.services.history.append(HistoryEntry {
            id: 0,
            command: line.split(' ').next().unwrap_or_default().to_string(),
            args: line.split(' ').skip(1).map(str::to_string).collect(),
            line: line.to_string(),
            working_directory: "/srv/app".into(),
            exit_code: 0,
            duration_ms: 1,
            output: String::new(),
            error: None,
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_history_lists_recent_oldest_first() {
        let harness = Harness::new();
        for n in 1..=25 {
            record(&harness, &format!("echo {}", n));
        }

        let out = harness.run("history").await;
        let lines: Vec<&str> = out.output.lines().collect();
        assert_eq!(lines.len(), 20);
        assert_eq!(lines[0], "    6  echo 6");
        assert_eq!(lines[19], "   25  echo 25");

        let out = harness.run("history 2").await;
        assert_eq!(out.output, "   24  echo 24\n   25  echo 25");
    }

    #[tokio::test]
    async fn test_history_bad_count() {
        let harness = Harness::new();
        let out = harness.run("history many").await;
        assert_eq!(out.exit_code, 1);
        assert!(out
            .error
            .unwrap()
            .starts_with("history: many: numeric argument required"));
    }

    #[tokio::test]
    async fn test_history_clear() {
        let harness = Harness::new();
        record(&harness, "pwd");
        record(&harness, "jobs");

        assert!(harness.run("history clear").await.is_success());
        assert!(harness.services.history.is_empty());
        assert_eq!(harness.run("history").await.output, "");
    }
}
