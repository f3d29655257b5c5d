//! Pipeline executor
//!
//! Runs parsed stages strictly in order. Each stage is resolved as a
//! built-in (longest registered name), else handed to the execution
//! service when the system-command predicate accepts it, else reported as
//! not found (exit 127).
//!
//! Stages are connected by threading captured text: stage `i`'s output
//! becomes stage `i + 1`'s input, which built-ins receive as a string and
//! external programs receive on stdin. Stages never run concurrently and
//! binary data is decoded lossily. A `<` redirect takes precedence over the
//! piped input.
//!
//! Redirect I/O goes through the execution service. Failures are logged and
//! never change the command's own outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::adapter::{ExecutionService, ExternalRequest, SystemCommandPredicate};
use super::registry::{CommandOutput, CommandRegistry, ShellCommandContext, ShellServices};
use super::types::{EnvChange, ExecutionResult, ShellContext, EXIT_NOT_FOUND};
use crate::parser::{ParsedCommand, RedirectKind};
use crate::ConsoleErrorCode;

/// Result of running a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub result: ExecutionResult,
    /// Context changes; only populated for single-stage lines
    pub changes: Vec<EnvChange>,
}

/// Runs pipelines against a registry and an execution service.
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: Arc<CommandRegistry>,
    adapter: Arc<dyn ExecutionService>,
    predicate: Arc<dyn SystemCommandPredicate>,
    timeout: Option<Duration>,
}

impl PipelineExecutor {
    pub fn new(
        registry: Arc<CommandRegistry>,
        adapter: Arc<dyn ExecutionService>,
        predicate: Arc<dyn SystemCommandPredicate>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            adapter,
            predicate,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &Arc<dyn ExecutionService> {
        &self.adapter
    }

    pub fn predicate(&self) -> &Arc<dyn SystemCommandPredicate> {
        &self.predicate
    }

    /// Logical command name and remaining arguments of a stage.
    ///
    /// Multi-word built-ins keep all their words in the name.
    pub fn resolve_name(&self, stage: &ParsedCommand) -> (String, Vec<String>) {
        let tokens = stage.tokens();
        match self.registry.resolve(&tokens) {
            Some((_, consumed)) => (tokens[..consumed].join(" "), tokens[consumed..].to_vec()),
            None => (stage.command.clone(), stage.args.clone()),
        }
    }

    /// True when the stage's leading tokens name a built-in.
    pub fn is_builtin(&self, stage: &ParsedCommand) -> bool {
        self.registry.resolve(&stage.tokens()).is_some()
    }

    /// Run `stages` in order against `context`.
    pub async fn run(
        &self,
        stages: &[ParsedCommand],
        context: &ShellContext,
        services: &ShellServices,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;
        let single = stages.len() == 1;

        let mut piped: Option<String> = None;
        let mut last = CommandOutput::empty();
        let mut changes = Vec::new();

        for (index, stage) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(stage = index, "pipeline.cancelled");
                return PipelineOutcome {
                    result: ExecutionResult::cancelled().with_duration(elapsed()),
                    changes: Vec::new(),
                };
            }

            let input = match self.read_input_redirect(stage, context).await {
                Some(content) => Some(content),
                None => piped.take(),
            };

            let mut output = self.run_stage(stage, input, context, services, cancel).await;
            self.apply_output_redirects(stage, &mut output, context).await;

            if !output.is_success() {
                debug!(stage = index, command = %stage.command, exit_code = output.exit_code, "pipeline.stage_failed");
                let result = ExecutionResult {
                    success: false,
                    output: output.output,
                    error_message: output.error,
                    exit_code: output.exit_code,
                    execution_time_ms: elapsed(),
                    failed_stage: (!single).then_some(index),
                    ..Default::default()
                };
                return PipelineOutcome {
                    result,
                    changes: Vec::new(),
                };
            }

            if single {
                changes = std::mem::take(&mut output.changes);
            }
            piped = Some(terminate_line(&output.output, output.trailing_newline));
            last = output;
        }

        let result = ExecutionResult {
            success: true,
            output: last.output,
            error_message: last.error,
            exit_code: last.exit_code,
            execution_time_ms: elapsed(),
            ..Default::default()
        };
        PipelineOutcome { result, changes }
    }

    async fn run_stage(
        &self,
        stage: &ParsedCommand,
        input: Option<String>,
        context: &ShellContext,
        services: &ShellServices,
        cancel: &CancellationToken,
    ) -> CommandOutput {
        let tokens = stage.tokens();

        if let Some((command, consumed)) = self.registry.resolve(&tokens) {
            let name = tokens[..consumed].join(" ");
            let command_context = ShellCommandContext {
                name: &name,
                args: tokens[consumed..].to_vec(),
                input,
                shell: context,
                services,
                cancel: cancel.clone(),
            };
            return match command.execute(command_context).await {
                Ok(output) => output,
                Err(e) => {
                    debug!(command = %name, error = %e, "pipeline.builtin_failed");
                    CommandOutput::from_error(&name, &e)
                }
            };
        }

        if !self.predicate.is_system_command(&stage.command) {
            return not_found(&stage.command);
        }

        let request = ExternalRequest::new(&stage.command, stage.args.clone(), context)
            .with_stdin(input.map(|text| terminate_line(&text, true)))
            .with_timeout(self.timeout);

        match self.adapter.run(request, cancel.clone()).await {
            Ok(process) => {
                let stdout = trim_line_endings(&process.stdout);
                let stderr = trim_line_endings(&process.stderr);
                if process.success() {
                    // Warnings of a successful run stay available to `2>`.
                    CommandOutput {
                        error: (!stderr.is_empty()).then_some(stderr),
                        ..CommandOutput::text(stdout)
                    }
                } else {
                    let error = if stderr.is_empty() {
                        format!("{} exited with code {}", stage.command, process.exit_code)
                    } else {
                        stderr
                    };
                    CommandOutput {
                        output: stdout,
                        error: Some(error),
                        exit_code: process.exit_code,
                        ..CommandOutput::default()
                    }
                }
            }
            Err(e) if e.code() == ConsoleErrorCode::CommandNotFound => not_found(&stage.command),
            Err(e) => {
                debug!(command = %stage.command, error = %e, "pipeline.external_failed");
                CommandOutput::failure(e.exit_code(), e.message().to_string())
            }
        }
    }

    /// Content of the last `<` redirect, if any could be read.
    async fn read_input_redirect(
        &self,
        stage: &ParsedCommand,
        context: &ShellContext,
    ) -> Option<String> {
        let redirect = stage
            .redirects
            .iter()
            .rev()
            .find(|r| r.kind == RedirectKind::Stdin)?;
        let path = context.resolve_path(&redirect.target);
        match self.adapter.read_file(path.clone()).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "redirect read failed");
                None
            }
        }
    }

    /// Write output and error to every output redirect, in parsed order.
    async fn apply_output_redirects(
        &self,
        stage: &ParsedCommand,
        output: &mut CommandOutput,
        context: &ShellContext,
    ) {
        let mut captured = false;

        for redirect in &stage.redirects {
            let contents = match redirect.kind {
                RedirectKind::Stdin => continue,
                RedirectKind::StdoutTruncate | RedirectKind::StdoutAppend => {
                    terminate_line(&output.output, output.trailing_newline)
                }
                RedirectKind::StderrTruncate | RedirectKind::StderrAppend => {
                    terminate_line(output.error.as_deref().unwrap_or_default(), true)
                }
            };

            let path = context.resolve_path(&redirect.target);
            let append = redirect.kind.is_append();
            match self.adapter.write_file(path.clone(), contents, append).await {
                Ok(()) => {
                    if matches!(
                        redirect.kind,
                        RedirectKind::StdoutTruncate | RedirectKind::StdoutAppend
                    ) {
                        captured = true;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "redirect write failed");
                }
            }
        }

        if captured {
            output.output.clear();
        }
    }
}

fn not_found(command: &str) -> CommandOutput {
    CommandOutput::failure(EXIT_NOT_FOUND, format!("command not found: {}", command))
}

/// Append a line terminator to non-empty text that lacks one.
fn terminate_line(text: &str, newline: bool) -> String {
    if newline && !text.is_empty() && !text.ends_with('\n') {
        format!("{}\n", text)
    } else {
        text.to_string()
    }
}

fn trim_line_endings(text: &str) -> String {
    text.trim_end_matches(['\n', '\r']).to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::parser::parse_line;
    use crate::shell::testing::Harness;
    use crate::shell::types::EXIT_CANCELLED;

    async fn run(harness: &Harness, line: &str) -> PipelineOutcome {
        let parsed = parse_line(line);
        harness
            .executor
            .run(
                &parsed.commands,
                &harness.context,
                &harness.services,
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_builtin_echo() {
        let harness = Harness::new();
        let outcome = run(&harness, "echo hello").await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.output, "hello");
        assert_eq!(outcome.result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_not_found() {
        let harness = Harness::new();
        let outcome = run(&harness, "nosuchcommand --flag").await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.exit_code, 127);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("command not found: nosuchcommand")
        );
        assert!(harness.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_external_receives_context() {
        let harness = Harness::new();
        let outcome = run(&harness, "cat notes.txt").await;
        assert_eq!(outcome.result.exit_code, 1);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("cat: notes.txt: No such file")
        );

        let request = &harness.mock.requests()[0];
        assert_eq!(request.cwd, PathBuf::from("/srv/app"));
        assert_eq!(request.args, vec!["notes.txt"]);
        assert_eq!(request.env.get("HOME").map(String::as_str), Some("/home/ops"));
    }

    #[tokio::test]
    async fn test_stdout_redirects() {
        let harness = Harness::new();

        let outcome = run(&harness, "echo first > out.txt").await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.output, "");
        assert_eq!(harness.mock.file("/srv/app/out.txt").as_deref(), Some("first\n"));

        run(&harness, "echo second >> out.txt").await;
        assert_eq!(
            harness.mock.file("/srv/app/out.txt").as_deref(),
            Some("first\nsecond\n")
        );

        run(&harness, "echo -n third > out.txt").await;
        assert_eq!(harness.mock.file("/srv/app/out.txt").as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn test_stderr_redirects() {
        let harness = Harness::new();
        let outcome = run(&harness, "fail 2 2> /tmp/err.txt").await;
        assert_eq!(outcome.result.exit_code, 2);
        assert_eq!(
            harness.mock.file("/tmp/err.txt").as_deref(),
            Some("failure reported\n")
        );

        run(&harness, "fail 2 2>> /tmp/err.txt").await;
        assert_eq!(
            harness.mock.file("/tmp/err.txt").as_deref(),
            Some("failure reported\nfailure reported\n")
        );
    }

    #[tokio::test]
    async fn test_stderr_of_successful_command_is_kept() {
        let harness = Harness::new();

        let outcome = run(&harness, "warn deprecated 2> /tmp/warn.txt").await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.exit_code, 0);
        assert_eq!(outcome.result.output, "ok");
        assert_eq!(
            harness.mock.file("/tmp/warn.txt").as_deref(),
            Some("warning: deprecated\n")
        );

        let outcome = run(&harness, "warn again").await;
        assert!(outcome.result.success);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("warning: again")
        );

        let outcome = run(&harness, "echo quiet").await;
        assert_eq!(outcome.result.error_message, None);
    }

    #[tokio::test]
    async fn test_stdin_redirect() {
        let harness = Harness::new();
        harness.mock.add_file("/srv/app/capture.log", "a\nb\nc\n");

        let outcome = run(&harness, "wc -l < capture.log").await;
        assert_eq!(outcome.result.output, "3");
        assert_eq!(
            harness.mock.requests()[0].stdin.as_deref(),
            Some("a\nb\nc\n")
        );
    }

    #[tokio::test]
    async fn test_stdin_redirect_wins_over_pipe() {
        let harness = Harness::new();
        harness.mock.add_file("/srv/app/two.txt", "x\ny\n");

        let outcome = run(&harness, "echo one | wc -l < two.txt").await;
        assert_eq!(outcome.result.output, "2");
    }

    #[tokio::test]
    async fn test_missing_stdin_file_is_not_fatal() {
        let harness = Harness::new();
        let outcome = run(&harness, "wc -l < missing.txt").await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.output, "0");
    }

    #[tokio::test]
    async fn test_output_threads_through_stages() {
        let harness = Harness::new();
        let outcome = run(&harness, "echo a b c | wc").await;
        assert!(outcome.result.success);
        // "a b c" plus the appended line terminator
        assert_eq!(outcome.result.output, "6");
        assert_eq!(outcome.result.failed_stage, None);
    }

    #[tokio::test]
    async fn test_failing_stage_stops_pipeline() {
        let harness = Harness::new();
        let outcome = run(&harness, "echo go | fail 3 | wc -l").await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.exit_code, 3);
        assert_eq!(outcome.result.failed_stage, Some(1));
        assert_eq!(outcome.result.error_message.as_deref(), Some("failure reported"));

        let commands: Vec<_> = harness
            .mock
            .requests()
            .into_iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(commands, vec!["fail"]);
    }

    #[tokio::test]
    async fn test_redirect_write_failure_keeps_outcome() {
        let harness = Harness::new();
        harness.mock.remove_directory("/srv/app/missing");

        let outcome = run(&harness, "echo kept > missing/out.txt").await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.output, "kept");
    }

    #[tokio::test]
    async fn test_changes_only_for_single_stage() {
        let harness = Harness::new();

        let outcome = run(&harness, "cd /tmp").await;
        assert_eq!(outcome.changes, vec![EnvChange::Cd(PathBuf::from("/tmp"))]);

        let outcome = run(&harness, "cd /tmp | echo x").await;
        assert!(outcome.result.success);
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let harness = Harness::new();
        let parsed = parse_line("echo never");
        let token = CancellationToken::new();
        token.cancel();

        let outcome = harness
            .executor
            .run(&parsed.commands, &harness.context, &harness.services, &token)
            .await;
        assert_eq!(outcome.result.exit_code, EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_resolve_name() {
        let harness = Harness::new();
        let parsed = parse_line("jobs clear now");
        let (name, args) = harness.executor.resolve_name(&parsed.commands[0]);
        assert_eq!(name, "jobs clear");
        assert_eq!(args, vec!["now"]);

        let parsed = parse_line("ping -c 1 host");
        let (name, args) = harness.executor.resolve_name(&parsed.commands[0]);
        assert_eq!(name, "ping");
        assert_eq!(args.len(), 3);
    }
}
