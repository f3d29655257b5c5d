//! Sleep command implementation
//!
//! Pauses for a specified duration. Cancelling the surrounding job wakes
//! it early with exit code 130.

use std::time::Duration;

use anyhow::bail;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};
use crate::shell::types::EXIT_CANCELLED;

/// The `sleep` command - pauses for N seconds.
pub struct SleepCommand;

impl ShellCommand for SleepCommand {
    fn name(&self) -> &str {
        "sleep"
    }

    fn summary(&self) -> &str {
        "Pause for a number of seconds"
    }

    fn usage(&self) -> &str {
        "sleep <seconds>[s|m|h|d]"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let duration_str = context.require_arg(0, "operand")?;
            let Some(duration) = parse_duration(duration_str) else {
                bail!("invalid time interval '{}'", duration_str);
            };

            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(CommandOutput::empty()),
                _ = context.cancel.cancelled() => {
                    Ok(CommandOutput::failure(EXIT_CANCELLED, "interrupted"))
                }
            }
        })
    }
}

/// Parse a duration string like "5", "2.5", "1m", "2h".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400.0)
    } else {
        (s, 1.0)
    };

    let seconds: f64 = num_str.parse().ok()?;

    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Duration::try_from_secs_f64(seconds * multiplier).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::Harness;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2.5"), Some(Duration::from_secs_f64(2.5)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("0.5s"), Some(Duration::from_secs_f64(0.5)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("-1"), None);
        assert_eq!(parse_duration("inf"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits() {
        let harness = Harness::new();
        let started = tokio::time::Instant::now();
        assert!(harness.run("sleep 3").await.is_success());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_sleep_errors() {
        let harness = Harness::new();
        assert_eq!(
            harness.run("sleep").await.error.as_deref(),
            Some("sleep: missing operand")
        );
        assert_eq!(
            harness.run("sleep soon").await.error.as_deref(),
            Some("sleep: invalid time interval 'soon'")
        );
    }
}
