//! Test doubles
//!
//! `MockExecutionService` is a scripted execution service with an in-memory
//! filesystem. It knows a handful of programs (`echo`, `cat`, `wc`, `fail`,
//! `warn`, `sleep`/`slow`, `env`) and its interactive processes echo every
//! written line back as stdout until they read `exit`.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::adapter::{
    AllowListPredicate, ExecutionService, ExternalRequest, ProcessHandle, ProcessOutput,
    SessionEvent,
};
use super::history::InMemoryHistory;
use super::jobs::JobScheduler;
use super::pipeline::PipelineExecutor;
use super::registry::{CommandOutput, CommandRegistry, ShellCommandContext, ShellServices};
use super::sessions::InteractiveSessionManager;
use super::types::ShellContext;
use crate::config::ConsoleConfig;
use crate::ConsoleError;

#[derive(Default)]
struct MockState {
    files: HashMap<PathBuf, String>,
    missing_dirs: BTreeSet<PathBuf>,
    failing_spawns: BTreeSet<String>,
    requests: Vec<ExternalRequest>,
    sessions: HashMap<ProcessHandle, mpsc::Sender<SessionEvent>>,
    shut_down: bool,
}

#[derive(Clone, Default)]
pub struct MockExecutionService {
    state: Arc<Mutex<MockState>>,
    next_handle: Arc<AtomicU64>,
}

impl MockExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.state.lock().unwrap().files.insert(path.into(), contents.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.lock().unwrap().files.get(path.as_ref()).cloned()
    }

    /// Make `directory_exists` report false for `path`.
    pub fn remove_directory(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().missing_dirs.insert(path.into());
    }

    pub fn fail_spawn(&self, command: &str) {
        self.state.lock().unwrap().failing_spawns.insert(command.to_string());
    }

    /// Every external request seen so far.
    pub fn requests(&self) -> Vec<ExternalRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn was_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }
}

fn output(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> ProcessOutput {
    ProcessOutput {
        exit_code,
        stdout: stdout.into(),
        stderr: stderr.into(),
        execution_time_ms: 0,
    }
}

impl ExecutionService for MockExecutionService {
    fn run(
        &self,
        request: ExternalRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ProcessOutput, ConsoleError>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.lock().unwrap().requests.push(request.clone());
            let args = &request.args;
            match request.command.as_str() {
                "echo" => Ok(output(0, format!("{}\n", args.join(" ")), "")),
                "cat" => {
                    if args.is_empty() {
                        return Ok(output(0, request.stdin.clone().unwrap_or_default(), ""));
                    }
                    let state = state.lock().unwrap();
                    let mut content = String::new();
                    for arg in args {
                        match state.files.get(&request.cwd.join(arg)) {
                            Some(text) => content.push_str(text),
                            None => {
                                return Ok(output(1, content, format!("cat: {}: No such file", arg)))
                            }
                        }
                    }
                    Ok(output(0, content, ""))
                }
                "wc" => {
                    let input = request.stdin.clone().unwrap_or_default();
                    let count = if args.iter().any(|a| a == "-l") {
                        input.lines().count()
                    } else {
                        input.chars().count()
                    };
                    Ok(output(0, format!("{}\n", count), ""))
                }
                "env" => {
                    let text: String = request
                        .env
                        .iter()
                        .map(|(k, v)| format!("{}={}\n", k, v))
                        .collect();
                    Ok(output(0, text, ""))
                }
                "fail" => {
                    let code = args.first().and_then(|a| a.parse().ok()).unwrap_or(1);
                    Ok(output(code, "partial\n", "failure reported\n"))
                }
                "warn" => Ok(output(
                    0,
                    "ok\n",
                    format!("warning: {}\n", args.join(" ")),
                )),
                "sleep" | "slow" => {
                    let secs: f64 = args.first().and_then(|a| a.parse().ok()).unwrap_or(0.0);
                    let sleep = tokio::time::sleep(Duration::from_secs_f64(secs));
                    let deadline = async {
                        match request.timeout {
                            Some(limit) => tokio::time::sleep(limit).await,
                            None => std::future::pending::<()>().await,
                        }
                    };
                    tokio::select! {
                        _ = sleep => Ok(output(0, "", "")),
                        _ = cancel.cancelled() => Ok(output(130, "", "interrupted")),
                        _ = deadline => Err(ConsoleError::timeout("sleep timed out")),
                    }
                }
                other => Err(ConsoleError::command_not_found(other)),
            }
        })
    }

    fn start_interactive(
        &self,
        request: ExternalRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> BoxFuture<'static, Result<ProcessHandle, ConsoleError>> {
        let state = self.state.clone();
        let handle = ProcessHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            if state.failing_spawns.contains(&request.command) {
                return Err(ConsoleError::spawn_failed(format!(
                    "{}: permission denied",
                    request.command
                )));
            }
            state.requests.push(request);
            state.sessions.insert(handle, events);
            Ok(handle)
        })
    }

    fn write(
        &self,
        handle: ProcessHandle,
        data: String,
    ) -> BoxFuture<'static, Result<(), ConsoleError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let sender = state
                .lock()
                .unwrap()
                .sessions
                .get(&handle)
                .cloned()
                .ok_or_else(|| ConsoleError::execution_failed("no live process"))?;
            for line in data.lines() {
                if line == "exit" {
                    state.lock().unwrap().sessions.remove(&handle);
                    let _ = sender.send(SessionEvent::Close(Some(0))).await;
                    break;
                }
                let _ = sender.send(SessionEvent::Stdout(line.to_string())).await;
            }
            Ok(())
        })
    }

    fn kill(&self, handle: ProcessHandle) -> BoxFuture<'static, Result<(), ConsoleError>> {
        let sender = self.state.lock().unwrap().sessions.remove(&handle);
        Box::pin(async move {
            let sender = sender.ok_or_else(|| ConsoleError::execution_failed("no live process"))?;
            let _ = sender.send(SessionEvent::Close(None)).await;
            Ok(())
        })
    }

    fn read_file(&self, path: PathBuf) -> BoxFuture<'static, Result<String, ConsoleError>> {
        let content = self.file(&path);
        Box::pin(async move {
            content.ok_or_else(|| ConsoleError::io(format!("{}: No such file", path.display())))
        })
    }

    fn write_file(
        &self,
        path: PathBuf,
        contents: String,
        append: bool,
    ) -> BoxFuture<'static, Result<(), ConsoleError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            if state.missing_dirs.iter().any(|dir| path.starts_with(dir)) {
                return Err(ConsoleError::io(format!("{}: No such directory", path.display())));
            }
            let file = state.files.entry(path).or_default();
            if !append {
                file.clear();
            }
            file.push_str(&contents);
            Ok(())
        })
    }

    fn directory_exists(&self, path: PathBuf) -> BoxFuture<'static, bool> {
        let state = self.state.lock().unwrap();
        let exists = !state.files.contains_key(&path)
            && !state.missing_dirs.iter().any(|dir| path.starts_with(dir));
        Box::pin(async move { exists })
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.sessions.clear();
        state.shut_down = true;
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Configuration that does not depend on the host environment.
pub fn test_config() -> ConsoleConfig {
    ConsoleConfig {
        home_directory: PathBuf::from("/home/ops"),
        inherit_environment: false,
        ..ConsoleConfig::default()
    }
}

/// Services wired to a mock adapter, for running built-ins directly.
pub struct Harness {
    pub mock: Arc<MockExecutionService>,
    pub executor: PipelineExecutor,
    pub services: ShellServices,
    pub context: ShellContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ConsoleConfig) -> Self {
        let config = Arc::new(config);
        let mock = Arc::new(MockExecutionService::new());
        let registry = Arc::new(CommandRegistry::with_builtins());
        let executor = PipelineExecutor::new(
            registry.clone(),
            mock.clone(),
            Arc::new(AllowListPredicate::new().with_extra(["fail", "warn", "slow"])),
            config.command_timeout(),
        );
        let sessions = InteractiveSessionManager::new(mock.clone());
        let history = Arc::new(InMemoryHistory::new(config.history_limit));
        let jobs = JobScheduler::new(executor.clone(), sessions, history, config.clone());
        let context = ShellContext::from_config(&config, "/srv/app");
        Self {
            mock,
            executor,
            services: jobs.services(),
            context,
        }
    }

    /// Run one built-in line directly, bypassing the executor.
    pub async fn run(&self, line: &str) -> CommandOutput {
        let tokens: Vec<String> = crate::parser::parse_line(line)
            .first()
            .map(|c| c.tokens())
            .unwrap_or_default();
        let (command, consumed) = self
            .services
            .registry
            .resolve(&tokens)
            .unwrap_or_else(|| panic!("not a built-in: {line}"));
        let name = tokens[..consumed].join(" ");
        let context = ShellCommandContext {
            name: &name,
            args: tokens[consumed..].to_vec(),
            input: None,
            shell: &self.context,
            services: &self.services,
            cancel: CancellationToken::new(),
        };
        match command.execute(context).await {
            Ok(output) => output,
            Err(e) => CommandOutput::from_error(&name, &e),
        }
    }
}
