//! Shell orchestrator
//!
//! The single entry point behind the console's text input. Each submitted
//! line goes through, in order:
//!
//! 1. expansion of a leading alias (one level, never recursive)
//! 2. parsing
//! 3. routing: background job, interactive session, or foreground run
//! 4. applying context changes of a single-stage foreground line
//! 5. one history entry, whatever the outcome
//!
//! Nothing a line does escapes as an error; every failure is an
//! [`ExecutionResult`] with a message and an exit code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::adapter::{
    AllowListPredicate, ExecutionService, ProcessExecutionService, SessionEvent,
    SystemCommandPredicate,
};
use super::history::{truncate_snapshot, HistoryEntry, HistoryStore, InMemoryHistory};
use super::jobs::JobScheduler;
use super::pipeline::PipelineExecutor;
use super::registry::{CommandRegistry, ShellCommand};
use super::sessions::InteractiveSessionManager;
use super::types::{ExecutionResult, ShellContext};
use crate::config::ConsoleConfig;
use crate::parser::{parse_line, ParsedLine};
use crate::ConsoleError;

/// Commands whose argument completes to a job or session id.
const ID_COMMANDS: &[&str] = &["fg", "bg", "kill", "send"];

/// One console: a context plus the engines that act on it.
pub struct ShellOrchestrator {
    context: ShellContext,
    scheduler: JobScheduler,
    sessions: InteractiveSessionManager,
    history: Arc<dyn HistoryStore>,
    config: Arc<ConsoleConfig>,
    session_events: HashMap<String, mpsc::Receiver<SessionEvent>>,
}

impl ShellOrchestrator {
    pub fn builder(config: ConsoleConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Execute one submitted line.
    pub async fn execute(&mut self, raw: &str) -> ExecutionResult {
        let started = Instant::now();
        let expanded = self.expand_alias(raw);
        let line = parse_line(&expanded);
        let Some(first) = line.first() else {
            if expanded.trim().is_empty() {
                return ExecutionResult::success("");
            }
            // Only operators and redirects, nothing to run.
            let error = ConsoleError::parse(format!("no command in '{}'", expanded.trim()));
            let result = ExecutionResult::from_error(&error)
                .with_duration(started.elapsed().as_millis() as u64);
            let working_directory = self.context.working_directory.clone();
            self.record(raw, String::new(), Vec::new(), working_directory, &result);
            return result;
        };

        let (command, args) = self.scheduler.executor().resolve_name(first);
        let working_directory = self.context.working_directory.clone();
        debug!(line = %line, command = %command, "console.execute");

        let result = if line.background {
            self.start_background(line)
        } else if self.routes_to_session(&line) {
            self.start_session(&command, args.clone()).await
        } else {
            let outcome = self.scheduler.execute(&line, &self.context).await;
            self.context.apply_changes(&outcome.changes);
            outcome.result
        };
        let result = result.with_duration(started.elapsed().as_millis() as u64);

        self.record(raw, command, args, working_directory, &result);
        self.drop_stale_session_events();
        result
    }

    /// Claim the event stream of a session started by [`execute`](Self::execute).
    ///
    /// Each stream can be taken once. Streams nobody claimed are dropped
    /// once their session has stopped, at the end of the next line.
    pub fn take_session_events(&mut self, id: &str) -> Option<mpsc::Receiver<SessionEvent>> {
        self.session_events.remove(id)
    }

    /// Completion candidates for a partially typed line.
    ///
    /// The first word completes over built-ins, aliases and known system
    /// commands; the argument of `fg`, `bg`, `kill` and `send` completes over
    /// job and session ids.
    pub fn complete(&self, partial: &str) -> Vec<String> {
        let words: Vec<&str> = partial.split_whitespace().collect();
        let open_word = !partial.ends_with(char::is_whitespace);

        let (prefix, mut candidates): (&str, Vec<String>) = match (words.as_slice(), open_word) {
            ([], _) => ("", self.command_names()),
            ([word], true) => (*word, self.command_names()),
            ([command], false) if ID_COMMANDS.contains(command) => ("", self.ids_for(command)),
            ([command, word], true) if ID_COMMANDS.contains(command) => {
                (*word, self.ids_for(command))
            }
            _ => return Vec::new(),
        };

        candidates.retain(|candidate| candidate.starts_with(prefix));
        candidates.sort();
        candidates.dedup();
        candidates
    }

    /// Cancel every running job and stop every session.
    pub async fn shutdown(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        let sessions = self.sessions.len();
        self.sessions.kill_all().await;
        self.scheduler.executor().adapter().shutdown();
        self.session_events.clear();
        info!(cancelled_jobs = cancelled, stopped_sessions = sessions, "console.shutdown");
    }

    pub fn context(&self) -> &ShellContext {
        &self.context
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn sessions(&self) -> &InteractiveSessionManager {
        &self.sessions
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    fn expand_alias(&self, raw: &str) -> String {
        let trimmed = raw.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (head, rest) = trimmed.split_at(end);
        match self.context.aliases.get(head) {
            Some(expansion) => {
                debug!(alias = %head, expansion = %expansion, "console.alias_expanded");
                format!("{}{}", expansion, rest)
            }
            None => raw.to_string(),
        }
    }

    /// Forget unclaimed streams whose session is gone.
    fn drop_stale_session_events(&mut self) {
        let sessions = &self.sessions;
        self.session_events.retain(|id, _| sessions.get(id).is_some());
    }

    fn start_background(&self, line: ParsedLine) -> ExecutionResult {
        match self.scheduler.execute_in_background(line, &self.context) {
            Ok(id) => ExecutionResult {
                background_job_id: Some(id.clone()),
                ..ExecutionResult::success(format!("[{}] started", id))
            },
            Err(e) => ExecutionResult::from_error(&e),
        }
    }

    /// A foreground single-stage line naming an interactive program.
    fn routes_to_session(&self, line: &ParsedLine) -> bool {
        match line.commands.as_slice() {
            [stage] => {
                stage.redirects.is_empty()
                    && self.config.is_interactive(&stage.command)
                    && !self.scheduler.executor().is_builtin(stage)
            }
            _ => false,
        }
    }

    async fn start_session(&mut self, command: &str, args: Vec<String>) -> ExecutionResult {
        match self.sessions.start_session(command, args, &self.context).await {
            Ok((id, events)) => {
                self.session_events.insert(id.clone(), events);
                ExecutionResult {
                    interactive_session_id: Some(id.clone()),
                    ..ExecutionResult::success(format!("[{}] {} started", id, command))
                }
            }
            Err(e) => ExecutionResult::from_error(&e),
        }
    }

    fn record(
        &self,
        raw: &str,
        command: String,
        args: Vec<String>,
        working_directory: PathBuf,
        result: &ExecutionResult,
    ) {
        let limit = self.config.history_output_chars;
        self.history.append(HistoryEntry {
            id: 0,
            command,
            args,
            line: raw.trim().to_string(),
            working_directory,
            exit_code: result.exit_code,
            duration_ms: result.execution_time_ms,
            output: truncate_snapshot(&result.output, limit),
            error: result
                .error_message
                .as_deref()
                .map(|error| truncate_snapshot(error, limit)),
            timestamp: Utc::now(),
        });
    }

    fn command_names(&self) -> Vec<String> {
        let executor = self.scheduler.executor();
        executor
            .registry()
            .names()
            .into_iter()
            .chain(self.context.aliases.keys().cloned())
            .chain(executor.predicate().known_commands())
            .collect()
    }

    fn ids_for(&self, command: &str) -> Vec<String> {
        match command {
            "fg" | "bg" => self.scheduler.job_ids(),
            "send" => self.sessions.ids(),
            _ => {
                let mut ids = self.scheduler.job_ids();
                ids.extend(self.sessions.ids());
                ids
            }
        }
    }
}

/// Wires a [`ShellOrchestrator`] together.
///
/// Defaults: a [`ProcessExecutionService`], the allow-list predicate extended
/// with `system_commands`, an [`InMemoryHistory`] of `history_limit` entries
/// and the process working directory.
pub struct OrchestratorBuilder {
    config: ConsoleConfig,
    adapter: Option<Arc<dyn ExecutionService>>,
    predicate: Option<Arc<dyn SystemCommandPredicate>>,
    history: Option<Arc<dyn HistoryStore>>,
    commands: Vec<Arc<dyn ShellCommand>>,
    working_directory: Option<PathBuf>,
}

impl OrchestratorBuilder {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            adapter: None,
            predicate: None,
            history: None,
            commands: Vec::new(),
            working_directory: None,
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn ExecutionService>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn predicate(mut self, predicate: Arc<dyn SystemCommandPredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Register an extra command. It replaces a built-in of the same name.
    pub fn command(mut self, command: Arc<dyn ShellCommand>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<ShellOrchestrator, ConsoleError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let working_directory = match self.working_directory {
            Some(dir) => dir,
            None => std::env::current_dir()
                .map_err(|e| ConsoleError::config(format!("working directory: {}", e)))?,
        };

        let adapter = self
            .adapter
            .unwrap_or_else(|| Arc::new(ProcessExecutionService::new()));
        let predicate = self.predicate.unwrap_or_else(|| {
            Arc::new(AllowListPredicate::new().with_extra(config.system_commands.iter().cloned()))
        });
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistory::new(config.history_limit)));

        let mut registry = CommandRegistry::with_builtins();
        for command in self.commands {
            registry.register(command);
        }

        let executor = PipelineExecutor::new(
            Arc::new(registry),
            adapter.clone(),
            predicate,
            config.command_timeout(),
        );
        let sessions = InteractiveSessionManager::new(adapter);
        let scheduler = JobScheduler::new(executor, sessions.clone(), history.clone(), config.clone());
        let context = ShellContext::from_config(&config, working_directory);
        info!(cwd = %context.cwd().display(), "console.ready");

        Ok(ShellOrchestrator {
            context,
            scheduler,
            sessions,
            history,
            config,
            session_events: HashMap::new(),
        })
    }
}
