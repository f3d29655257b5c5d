//! Built-in shell commands
//!
//! Every built-in implements [`ShellCommand`]. Handlers never touch the
//! [`ShellContext`](crate::shell::types::ShellContext) directly; they return
//! [`EnvChange`](crate::shell::types::EnvChange) lists in their
//! [`CommandOutput`].
//!
//! Groups:
//! - context: cd, pwd, export, set, unset, alias, unalias
//! - jobs: jobs, jobs clear, fg, bg, kill
//! - sessions: sessions, send
//! - misc: echo, sleep, help, history, history clear, true, false

mod alias;
mod args;
mod cd;
mod echo;
mod export;
mod help;
mod history;
mod jobs;
mod pwd;
mod sessions;
mod set;
mod sleep;
mod unset;

use std::sync::Arc;

use super::registry::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};
use super::types::EXIT_FAILURE;

pub use args::*;

pub use alias::{AliasCommand, UnaliasCommand};
pub use cd::CdCommand;
pub use echo::EchoCommand;
pub use export::ExportCommand;
pub use help::HelpCommand;
pub use history::{HistoryClearCommand, HistoryCommand};
pub use jobs::{BgCommand, FgCommand, JobsClearCommand, JobsCommand, KillCommand};
pub use pwd::PwdCommand;
pub use sessions::{SendCommand, SessionsCommand};
pub use set::SetCommand;
pub use sleep::SleepCommand;
pub use unset::UnsetCommand;

/// True command - always returns exit code 0.
struct TrueCommand;

impl ShellCommand for TrueCommand {
    fn name(&self) -> &str {
        "true"
    }

    fn summary(&self) -> &str {
        "Do nothing, successfully"
    }

    fn execute<'a>(&'a self, _context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async { Ok(CommandOutput::empty()) })
    }
}

/// False command - always returns exit code 1.
struct FalseCommand;

impl ShellCommand for FalseCommand {
    fn name(&self) -> &str {
        "false"
    }

    fn summary(&self) -> &str {
        "Do nothing, unsuccessfully"
    }

    fn execute<'a>(&'a self, _context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async { Ok(CommandOutput::exit(EXIT_FAILURE)) })
    }
}

/// Every built-in command.
pub fn builtin_commands() -> Vec<Arc<dyn ShellCommand>> {
    vec![
        // Context commands
        Arc::new(CdCommand),
        Arc::new(PwdCommand),
        Arc::new(ExportCommand),
        Arc::new(SetCommand),
        Arc::new(UnsetCommand),
        Arc::new(AliasCommand),
        Arc::new(UnaliasCommand),
        // Job control
        Arc::new(JobsCommand),
        Arc::new(JobsClearCommand),
        Arc::new(FgCommand),
        Arc::new(BgCommand),
        Arc::new(KillCommand),
        // Interactive sessions
        Arc::new(SessionsCommand),
        Arc::new(SendCommand),
        // Utility commands
        Arc::new(EchoCommand),
        Arc::new(SleepCommand),
        Arc::new(HelpCommand),
        Arc::new(HistoryCommand),
        Arc::new(HistoryClearCommand),
        // Boolean commands
        Arc::new(TrueCommand),
        Arc::new(FalseCommand),
    ]
}
