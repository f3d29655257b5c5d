//! Interactive session commands: sessions, send

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};

/// The `sessions` command - lists live interactive sessions.
pub struct SessionsCommand;

impl ShellCommand for SessionsCommand {
    fn name(&self) -> &str {
        "sessions"
    }

    fn summary(&self) -> &str {
        "List interactive sessions"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let sessions = context.services.sessions.list();
            if sessions.is_empty() {
                return Ok(CommandOutput::text("no interactive sessions"));
            }
            let listing: Vec<String> = sessions
                .iter()
                .map(|s| format!("[{}] {:<8} {}", s.id, s.state, s.command_line()))
                .collect();
            Ok(CommandOutput::text(listing.join("\n")))
        })
    }
}

/// The `send` command - writes one line to a session's input.
pub struct SendCommand;

impl ShellCommand for SendCommand {
    fn name(&self) -> &str {
        "send"
    }

    fn summary(&self) -> &str {
        "Send a line of input to an interactive session"
    }

    fn usage(&self) -> &str {
        "send <session-id> <text...>"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let id = context.require_arg(0, "session id")?;
            let text = format!("{}\n", context.args[1..].join(" "));
            context.services.sessions.write_to_session(id, &text).await?;
            Ok(CommandOutput::empty())
        })
    }
}
