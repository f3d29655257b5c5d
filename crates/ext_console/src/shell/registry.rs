//! Command registry
//!
//! Built-in commands implement [`ShellCommand`] and are looked up by name in
//! a [`CommandRegistry`]. Names may contain spaces (`jobs clear`); the
//! registry resolves the longest registered name matching the leading tokens
//! of a stage.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::adapter::ExecutionService;
use super::history::HistoryStore;
use super::jobs::JobScheduler;
use super::sessions::InteractiveSessionManager;
use super::types::{EnvChange, ShellContext, EXIT_FAILURE, EXIT_SUCCESS};
use crate::config::ConsoleConfig;
use crate::ConsoleError;

/// Future returned by [`ShellCommand::execute`].
pub type FutureCommandResult<'a> = BoxFuture<'a, anyhow::Result<CommandOutput>>;

/// Trait for implementing built-in commands.
///
/// Handlers may fail with any error; the executor renders it as
/// `"<name>: <error>"` with exit code 1.
pub trait ShellCommand: Send + Sync {
    /// Registered name, possibly multi-word.
    fn name(&self) -> &str;

    /// Additional names resolving to the same handler.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// One-line description shown by `help`.
    fn summary(&self) -> &str;

    /// Usage line shown by `help <name>`.
    fn usage(&self) -> &str {
        self.name()
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a>;
}

/// Output of a built-in command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i32,
    /// Context changes applied when the line ran in the foreground
    pub changes: Vec<EnvChange>,
    /// Whether redirected output gets a line terminator (`echo -n` clears it)
    pub trailing_newline: bool,
}

impl Default for CommandOutput {
    fn default() -> Self {
        Self {
            output: String::new(),
            error: None,
            exit_code: EXIT_SUCCESS,
            changes: Vec::new(),
            trailing_newline: true,
        }
    }
}

impl CommandOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// Successful result that only changes the context.
    pub fn changes(changes: Vec<EnvChange>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            exit_code,
            ..Self::default()
        }
    }

    /// Plain non-zero exit without a message.
    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn without_newline(mut self) -> Self {
        self.trailing_newline = false;
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    /// Render a handler error the way every built-in failure looks.
    pub fn from_error(name: &str, error: &anyhow::Error) -> Self {
        match error.downcast_ref::<ConsoleError>() {
            Some(console) => Self::failure(EXIT_FAILURE, format!("{}: {}", name, console.message())),
            None => Self::failure(EXIT_FAILURE, format!("{}: {}", name, error)),
        }
    }
}

/// Collaborators a built-in can reach.
#[derive(Clone)]
pub struct ShellServices {
    pub adapter: Arc<dyn ExecutionService>,
    pub jobs: JobScheduler,
    pub sessions: InteractiveSessionManager,
    pub history: Arc<dyn HistoryStore>,
    pub registry: Arc<CommandRegistry>,
    pub config: Arc<ConsoleConfig>,
}

/// Context provided to a built-in during execution.
pub struct ShellCommandContext<'a> {
    /// Resolved command name
    pub name: &'a str,
    /// Arguments after the command name
    pub args: Vec<String>,
    /// Piped or redirected input, if any
    pub input: Option<String>,
    /// Context snapshot the command runs against
    pub shell: &'a ShellContext,
    pub services: &'a ShellServices,
    pub cancel: CancellationToken,
}

impl ShellCommandContext<'_> {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Required argument, failing with a usage-style error.
    pub fn require_arg(&self, index: usize, what: &str) -> anyhow::Result<&str> {
        self.arg(index)
            .ok_or_else(|| anyhow::anyhow!("missing {}", what))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name-keyed map of built-in commands.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn ShellCommand>>,
    max_words: usize,
}

impl CommandRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for command in super::commands::builtin_commands() {
            registry.register(command);
        }
        registry
    }

    /// Register a command under its name and aliases. Last registration wins.
    pub fn register(&mut self, command: Arc<dyn ShellCommand>) {
        let names = std::iter::once(command.name()).chain(command.aliases().iter().copied());
        let names: Vec<String> = names.map(str::to_string).collect();
        for name in names {
            self.max_words = self.max_words.max(name.split(' ').count());
            self.commands.insert(name, Arc::clone(&command));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ShellCommand>> {
        self.commands.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Resolve the longest registered name formed by the leading tokens.
    ///
    /// Returns the handler and the number of tokens its name consumed.
    pub fn resolve(&self, tokens: &[String]) -> Option<(Arc<dyn ShellCommand>, usize)> {
        let longest = self.max_words.min(tokens.len());
        (1..=longest).rev().find_map(|n| {
            let name = tokens[..n].join(" ");
            self.get(&name).map(|command| (command, n))
        })
    }

    /// Every registered name, aliases included, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered commands under their primary name, sorted by name.
    pub fn commands(&self) -> Vec<Arc<dyn ShellCommand>> {
        let mut commands: Vec<Arc<dyn ShellCommand>> = self
            .commands
            .iter()
            .filter(|(name, command)| command.name() == name.as_str())
            .map(|(_, command)| Arc::clone(command))
            .collect();
        commands.sort_by(|a, b| a.name().cmp(b.name()));
        commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
