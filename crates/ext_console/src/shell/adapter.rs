//! Execution service boundary
//!
//! Everything that touches the host OS goes through [`ExecutionService`]:
//! one-shot external runs, interactive processes with an event stream, and
//! the small set of filesystem operations redirects need.
//! [`ProcessExecutionService`] is the tokio-process implementation used by
//! the CLI; tests substitute a scripted in-memory service.
//!
//! Whether a name is worth handing to the host at all is decided by a
//! [`SystemCommandPredicate`], so unknown words surface as "command not
//! found" instead of spawn failures.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use super::process_table::ProcessHandle;
use super::process_table::ProcessTable;
use super::types::{ShellContext, EXIT_CANCELLED, EXIT_FAILURE};
use crate::ConsoleError;

/// Time a killed interactive process gets to exit after SIGTERM.
const KILL_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Boundary Types
// ============================================================================

/// One external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Data written to the process's stdin, which is then closed
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl ExternalRequest {
    /// Build a request that runs in `context`'s directory and environment.
    pub fn new(command: impl Into<String>, args: Vec<String>, context: &ShellContext) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: context.working_directory.clone(),
            env: context.environment.clone(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured result of a one-shot external run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Event emitted by an interactive process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum SessionEvent {
    /// One line of stdout, without the line terminator
    Stdout(String),
    /// One line of stderr, without the line terminator
    Stderr(String),
    /// The process exited; `None` when no exit code is available
    Close(Option<i32>),
}

/// Host collaborator that actually runs processes and touches files.
pub trait ExecutionService: Send + Sync {
    /// Run a program to completion and capture its output.
    ///
    /// Cancelling `cancel` terminates the process and yields exit code 130.
    fn run(
        &self,
        request: ExternalRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ProcessOutput, ConsoleError>>;

    /// Start a long-lived process that reports through `events` until it
    /// sends [`SessionEvent::Close`].
    fn start_interactive(
        &self,
        request: ExternalRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> BoxFuture<'static, Result<ProcessHandle, ConsoleError>>;

    /// Write raw data to an interactive process's stdin.
    fn write(&self, handle: ProcessHandle, data: String)
        -> BoxFuture<'static, Result<(), ConsoleError>>;

    /// Request termination of an interactive process.
    fn kill(&self, handle: ProcessHandle) -> BoxFuture<'static, Result<(), ConsoleError>>;

    fn read_file(&self, path: PathBuf) -> BoxFuture<'static, Result<String, ConsoleError>>;

    fn write_file(
        &self,
        path: PathBuf,
        contents: String,
        append: bool,
    ) -> BoxFuture<'static, Result<(), ConsoleError>>;

    fn directory_exists(&self, path: PathBuf) -> BoxFuture<'static, bool>;

    /// Terminate whatever the service still runs. Called once when the
    /// console shuts down.
    fn shutdown(&self) {}
}

// ============================================================================
// System Command Predicate
// ============================================================================

/// Decides whether a non-built-in name should be attempted as a process.
pub trait SystemCommandPredicate: Send + Sync {
    fn is_system_command(&self, name: &str) -> bool;

    /// Names offered by tab completion.
    fn known_commands(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Common programs accepted without a path.
pub const DEFAULT_SYSTEM_COMMANDS: &[&str] = &[
    // files and text
    "ls", "cat", "grep", "egrep", "find", "head", "tail", "wc", "sort", "uniq", "cut", "tr",
    "sed", "awk", "diff", "file", "stat", "touch", "cp", "mv", "rm", "mkdir", "rmdir", "chmod",
    "ln", "du", "df", "tee", "xargs", "seq", "printf", "xxd", "hexdump", "od", "base64",
    "md5sum", "sha256sum", "tar", "gzip", "gunzip", "zip", "unzip", "less", "more",
    // system
    "ps", "top", "uname", "whoami", "hostname", "date", "env", "which", "uptime", "id", "sh",
    "bash", "zsh",
    // network
    "ping", "traceroute", "tracepath", "curl", "wget", "nslookup", "dig", "host", "netstat",
    "ss", "ip", "ifconfig", "arp", "route", "nmap", "tcpdump", "tshark", "openssl", "ssh", "scp",
    "sftp", "telnet", "nc", "ncat", "socat", "mosquitto_pub", "mosquitto_sub", "grpcurl",
    "websocat",
    // clients and toolchains
    "mysql", "psql", "redis-cli", "mongosh", "sqlite3", "python", "python3", "node", "npm",
    "git", "make", "cargo", "docker", "kubectl",
];

/// Extensions that mark a word as an executable script.
const EXECUTABLE_EXTENSIONS: &[&str] = &["sh", "bash", "py", "exe", "bat", "cmd", "ps1"];

/// Allow-list based predicate.
///
/// A name passes when it is on the list, contains a path separator, or ends
/// with a script/executable extension.
#[derive(Debug, Clone)]
pub struct AllowListPredicate {
    names: BTreeSet<String>,
}

impl Default for AllowListPredicate {
    fn default() -> Self {
        Self::new()
    }
}

impl AllowListPredicate {
    pub fn new() -> Self {
        Self {
            names: DEFAULT_SYSTEM_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Start from an empty list.
    pub fn empty() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    pub fn with_extra<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }
}

impl SystemCommandPredicate for AllowListPredicate {
    fn is_system_command(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if self.names.contains(name) {
            return true;
        }
        if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
            return true;
        }
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXECUTABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }

    fn known_commands(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

// ============================================================================
// Tokio Process Implementation
// ============================================================================

/// Runs requests as real child processes via `tokio::process`.
#[derive(Clone, Default)]
pub struct ProcessExecutionService {
    table: ProcessTable,
}

impl ProcessExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interactive processes currently alive.
    pub fn process_table(&self) -> &ProcessTable {
        &self.table
    }
}

impl ExecutionService for ProcessExecutionService {
    fn run(
        &self,
        request: ExternalRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ProcessOutput, ConsoleError>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut command = build_command(&request)?;
            command
                .stdin(if request.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = command
                .spawn()
                .map_err(|e| spawn_error(&request.command, e))?;
            debug!(command = %request.command, pid = ?child.id(), "adapter.spawn");

            if let (Some(input), Some(mut stdin)) = (request.stdin.clone(), child.stdin.take()) {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(input.as_bytes()).await {
                        debug!(error = %e, "adapter.stdin_write_failed");
                    }
                });
            }

            let timeout = request.timeout;
            let deadline = async move {
                match timeout {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => std::future::pending::<()>().await,
                }
            };

            // Dropping the wait future drops the child, which kills it.
            tokio::select! {
                output = child.wait_with_output() => {
                    let output = output.map_err(|e| {
                        ConsoleError::execution_failed(format!("{}: {}", request.command, e))
                    })?;
                    Ok(ProcessOutput {
                        exit_code: exit_status_code(output.status),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    })
                }
                _ = cancel.cancelled() => {
                    debug!(command = %request.command, "adapter.cancelled");
                    Ok(ProcessOutput {
                        exit_code: EXIT_CANCELLED,
                        stdout: String::new(),
                        stderr: "interrupted".to_string(),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    })
                }
                _ = deadline => {
                    let limit = timeout.map(|d| d.as_millis()).unwrap_or_default();
                    warn!(command = %request.command, timeout_ms = limit as u64, "adapter.timeout");
                    Err(ConsoleError::timeout(format!(
                        "{} did not finish within {} ms",
                        request.command, limit
                    )))
                }
            }
        })
    }

    fn start_interactive(
        &self,
        request: ExternalRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> BoxFuture<'static, Result<ProcessHandle, ConsoleError>> {
        let table = self.table.clone();
        Box::pin(async move {
            let mut command = build_command(&request)?;
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = command
                .spawn()
                .map_err(|e| spawn_error(&request.command, e))?;
            let pid = child.id();
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (handle, kill) = table.register(pid, child.stdin.take());
            debug!(command = %request.command, %handle, pid = ?pid, "adapter.interactive_started");

            let readers = [
                stdout.map(|s| tokio::spawn(forward_lines(s, events.clone(), SessionEvent::Stdout))),
                stderr.map(|s| tokio::spawn(forward_lines(s, events.clone(), SessionEvent::Stderr))),
            ];

            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status.ok(),
                    _ = kill.cancelled() => terminate(&mut child).await,
                };

                for reader in readers.into_iter().flatten() {
                    let _ = reader.await;
                }
                table.remove(handle);

                let code = status.map(exit_status_code);
                debug!(%handle, exit_code = ?code, "adapter.interactive_closed");
                let _ = events.send(SessionEvent::Close(code)).await;
            });

            Ok(handle)
        })
    }

    fn write(
        &self,
        handle: ProcessHandle,
        data: String,
    ) -> BoxFuture<'static, Result<(), ConsoleError>> {
        let stdin = self.table.stdin(handle);
        Box::pin(async move {
            let stdin = stdin.ok_or_else(|| {
                ConsoleError::execution_failed(format!("no live process {}", handle))
            })?;
            let mut stdin = stdin.lock().await;
            stdin.write_all(data.as_bytes()).await?;
            stdin.flush().await?;
            Ok(())
        })
    }

    fn kill(&self, handle: ProcessHandle) -> BoxFuture<'static, Result<(), ConsoleError>> {
        let found = self.table.kill(handle);
        Box::pin(async move {
            if found {
                debug!(%handle, "adapter.kill");
                Ok(())
            } else {
                Err(ConsoleError::execution_failed(format!("no live process {}", handle)))
            }
        })
    }

    fn read_file(&self, path: PathBuf) -> BoxFuture<'static, Result<String, ConsoleError>> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ConsoleError::io(format!("{}: {}", path.display(), e)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    }

    fn write_file(
        &self,
        path: PathBuf,
        contents: String,
        append: bool,
    ) -> BoxFuture<'static, Result<(), ConsoleError>> {
        Box::pin(async move {
            let mut options = tokio::fs::OpenOptions::new();
            options.create(true);
            if append {
                options.append(true);
            } else {
                options.write(true).truncate(true);
            }
            let mut file = options
                .open(&path)
                .await
                .map_err(|e| ConsoleError::io(format!("{}: {}", path.display(), e)))?;
            file.write_all(contents.as_bytes())
                .await
                .map_err(|e| ConsoleError::io(format!("{}: {}", path.display(), e)))?;
            file.flush().await?;
            Ok(())
        })
    }

    fn directory_exists(&self, path: PathBuf) -> BoxFuture<'static, bool> {
        Box::pin(async move {
            tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
        })
    }

    fn shutdown(&self) {
        if !self.table.is_empty() {
            debug!(pids = ?self.table.pids(), "adapter.shutdown");
        }
        self.table.kill_all();
    }
}

/// Resolve the program and build a command with the request's cwd and env.
fn build_command(request: &ExternalRequest) -> Result<Command, ConsoleError> {
    let program = resolve_program(request)?;
    let mut command = Command::new(program);
    command
        .args(&request.args)
        .current_dir(&request.cwd)
        .env_clear()
        .envs(&request.env);
    Ok(command)
}

fn resolve_program(request: &ExternalRequest) -> Result<PathBuf, ConsoleError> {
    let name = request.command.as_str();
    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        let path = request.cwd.join(name);
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConsoleError::command_not_found(name))
        };
    }

    let search_path = request
        .env
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok());
    which::which_in(name, search_path, &request.cwd)
        .map_err(|_| ConsoleError::command_not_found(name))
}

fn spawn_error(command: &str, error: std::io::Error) -> ConsoleError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ConsoleError::command_not_found(command)
    } else {
        ConsoleError::spawn_failed(format!("{}: {}", command, error))
    }
}

/// Map an exit status to a shell exit code (128 + signal when killed).
fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_FAILURE
}

async fn forward_lines<R>(reader: R, events: mpsc::Sender<SessionEvent>, wrap: fn(String) -> SessionEvent)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "adapter.read_failed");
                break;
            }
        }
    }
}

/// Ask a child to exit, escalating to SIGKILL after a grace period.
async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        match child.id() {
            Some(pid) => super::process_table::send_sigterm(pid),
            None => {
                let _ = child.start_kill();
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let predicate = AllowListPredicate::new();
        assert!(predicate.is_system_command("ls"));
        assert!(predicate.is_system_command("tcpdump"));
        assert!(predicate.is_system_command("./capture"));
        assert!(predicate.is_system_command("/usr/local/bin/probe"));
        assert!(predicate.is_system_command("deploy.sh"));
        assert!(predicate.is_system_command("Setup.EXE"));
        assert!(!predicate.is_system_command("frobnicate"));
        assert!(!predicate.is_system_command(""));

        let extended = AllowListPredicate::empty().with_extra(["frobnicate"]);
        assert!(extended.is_system_command("frobnicate"));
        assert!(!extended.is_system_command("ls"));
        assert_eq!(extended.known_commands(), vec!["frobnicate"]);
    }

    #[test]
    fn test_session_event_serialization() {
        let json = serde_json::to_value(SessionEvent::Stdout("hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "stdout", "payload": "hi"}));

        let json = serde_json::to_value(SessionEvent::Close(Some(0))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "close", "payload": 0}));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn request(command: &str, args: &[&str], cwd: &Path) -> ExternalRequest {
            let mut env = BTreeMap::new();
            if let Ok(path) = std::env::var("PATH") {
                env.insert("PATH".to_string(), path);
            }
            ExternalRequest {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                cwd: cwd.to_path_buf(),
                env,
                stdin: None,
                timeout: None,
            }
        }

        #[tokio::test]
        async fn test_run_captures_output_and_exit_code() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let req = request("sh", &["-c", "echo out; echo err >&2; exit 3"], dir.path());

            let output = service.run(req, CancellationToken::new()).await.unwrap();
            assert_eq!(output.exit_code, 3);
            assert_eq!(output.stdout, "out\n");
            assert_eq!(output.stderr, "err\n");
            assert!(!output.success());
        }

        #[tokio::test]
        async fn test_run_uses_cwd_env_and_stdin() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();

            let mut req = request("sh", &["-c", "pwd; echo $PROBE"], dir.path());
            req.env.insert("PROBE".into(), "enabled".into());
            let output = service.run(req, CancellationToken::new()).await.unwrap();
            let canonical = std::fs::canonicalize(dir.path()).unwrap();
            assert!(output.stdout.contains(canonical.to_str().unwrap()));
            assert!(output.stdout.ends_with("enabled\n"));

            let req = request("cat", &[], dir.path()).with_stdin(Some("piped\n".into()));
            let output = service.run(req, CancellationToken::new()).await.unwrap();
            assert_eq!(output.stdout, "piped\n");
        }

        #[tokio::test]
        async fn test_run_missing_program() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let req = request("definitely-not-installed-console-probe", &[], dir.path());

            let err = service.run(req, CancellationToken::new()).await.unwrap_err();
            assert_eq!(err.exit_code(), 127);
        }

        #[tokio::test]
        async fn test_run_timeout_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let req = request("sleep", &["5"], dir.path())
                .with_timeout(Some(Duration::from_millis(100)));

            let started = Instant::now();
            let err = service.run(req, CancellationToken::new()).await.unwrap_err();
            assert_eq!(err.code(), crate::ConsoleErrorCode::Timeout);
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn test_run_cancellation() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let req = request("sleep", &["5"], dir.path());
            let token = CancellationToken::new();

            let canceller = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                canceller.cancel();
            });

            let output = service.run(req, token).await.unwrap();
            assert_eq!(output.exit_code, 130);
        }

        #[tokio::test]
        async fn test_interactive_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let (tx, mut rx) = mpsc::channel(16);

            let handle = service
                .start_interactive(request("cat", &[], dir.path()), tx)
                .await
                .unwrap();
            assert!(service.process_table().contains(handle));

            service.write(handle, "ping\n".into()).await.unwrap();
            assert_eq!(rx.recv().await, Some(SessionEvent::Stdout("ping".into())));

            service.kill(handle).await.unwrap();
            loop {
                match rx.recv().await {
                    Some(SessionEvent::Close(_)) => break,
                    Some(_) => continue,
                    None => panic!("event stream ended without close"),
                }
            }
            assert!(!service.process_table().contains(handle));
            assert!(service.write(handle, "late\n".into()).await.is_err());
        }

        #[tokio::test]
        async fn test_shutdown_terminates_interactive_processes() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let (tx, mut rx) = mpsc::channel(16);

            let handle = service
                .start_interactive(request("cat", &[], dir.path()), tx)
                .await
                .unwrap();
            service.shutdown();

            loop {
                match rx.recv().await {
                    Some(SessionEvent::Close(_)) => break,
                    Some(_) => continue,
                    None => panic!("event stream ended without close"),
                }
            }
            assert!(!service.process_table().contains(handle));
            assert!(service.process_table().pids().is_empty());
        }

        #[tokio::test]
        async fn test_file_operations() {
            let dir = tempfile::tempdir().unwrap();
            let service = ProcessExecutionService::new();
            let path = dir.path().join("capture.txt");

            service.write_file(path.clone(), "one\n".into(), false).await.unwrap();
            service.write_file(path.clone(), "two\n".into(), true).await.unwrap();
            assert_eq!(service.read_file(path.clone()).await.unwrap(), "one\ntwo\n");

            service.write_file(path.clone(), "three\n".into(), false).await.unwrap();
            assert_eq!(service.read_file(path.clone()).await.unwrap(), "three\n");

            assert!(service.directory_exists(dir.path().to_path_buf()).await);
            assert!(!service.directory_exists(path).await);
            assert!(service.read_file(dir.path().join("missing")).await.is_err());
        }
    }
}
