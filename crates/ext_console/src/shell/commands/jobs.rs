//! Job control commands: jobs, jobs clear, fg, bg, kill

use anyhow::bail;

use super::{CommandOutput, FutureCommandResult, ShellCommand, ShellCommandContext};
use crate::shell::jobs::JobInfo;
use crate::ConsoleErrorCode;

/// The `jobs` command - lists tracked background jobs.
pub struct JobsCommand;

impl ShellCommand for JobsCommand {
    fn name(&self) -> &str {
        "jobs"
    }

    fn summary(&self) -> &str {
        "List background jobs"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let jobs = context.services.jobs.list_jobs();
            if jobs.is_empty() {
                return Ok(CommandOutput::text("no jobs"));
            }
            let listing: Vec<String> = jobs.iter().map(format_job).collect();
            Ok(CommandOutput::text(listing.join("\n")))
        })
    }
}

/// The `jobs clear` command - forgets finished jobs.
pub struct JobsClearCommand;

impl ShellCommand for JobsClearCommand {
    fn name(&self) -> &str {
        "jobs clear"
    }

    fn summary(&self) -> &str {
        "Forget finished background jobs"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let removed = context.services.jobs.clear_job_history();
            Ok(CommandOutput::text(format!("cleared {} finished job(s)", removed)))
        })
    }
}

/// The `fg` command - waits for a job and shows its result.
pub struct FgCommand;

impl ShellCommand for FgCommand {
    fn name(&self) -> &str {
        "fg"
    }

    fn summary(&self) -> &str {
        "Wait for a background job and show its result"
    }

    fn usage(&self) -> &str {
        "fg <job-id>"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let id = context.require_arg(0, "job id")?;
            let jobs = &context.services.jobs;

            let result = tokio::select! {
                result = jobs.foreground_job(id) => result?,
                // Interrupting fg leaves the job running.
                _ = context.cancel.cancelled() => bail!("{}: still running", id),
            };

            Ok(CommandOutput {
                output: result.output,
                error: result.error_message,
                exit_code: result.exit_code,
                ..CommandOutput::default()
            })
        })
    }
}

/// The `bg` command - confirms a job keeps running in the background.
pub struct BgCommand;

impl ShellCommand for BgCommand {
    fn name(&self) -> &str {
        "bg"
    }

    fn summary(&self) -> &str {
        "Keep a job running in the background"
    }

    fn usage(&self) -> &str {
        "bg <job-id>"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let id = context.require_arg(0, "job id")?;
            let jobs = &context.services.jobs;

            if jobs.background_job(id) {
                return Ok(CommandOutput::text(format!("[{}] running in background", id)));
            }
            match jobs.job(id) {
                Some(job) => bail!("{}: job has already {}", id, job.status.to_string().to_lowercase()),
                None => bail!("{}: no such job", id),
            }
        })
    }
}

/// The `kill` command - cancels a job or stops an interactive session.
pub struct KillCommand;

impl ShellCommand for KillCommand {
    fn name(&self) -> &str {
        "kill"
    }

    fn summary(&self) -> &str {
        "Cancel a background job or stop an interactive session"
    }

    fn usage(&self) -> &str {
        "kill <job-id | session-id>"
    }

    fn execute<'a>(&'a self, context: ShellCommandContext<'a>) -> FutureCommandResult<'a> {
        Box::pin(async move {
            let id = context.require_arg(0, "job or session id")?;
            let services = context.services;

            if let Some(job) = services.jobs.job(id) {
                if services.jobs.cancel_job(id) {
                    return Ok(CommandOutput::text(format!("[{}] cancelled", id)));
                }
                bail!("{}: job has already {}", id, job.status.to_string().to_lowercase());
            }

            match services.sessions.kill_session(id).await {
                Ok(session) => Ok(CommandOutput::text(format!("[{}] {}", session.id, session.state))),
                Err(e) if e.code() == ConsoleErrorCode::SessionNotFound => {
                    bail!("{}: no such job or session", id)
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn format_job(job: &JobInfo) -> String {
    let status = match job.exit_code {
        Some(code) if job.status.is_terminal() => format!("{} ({})", job.status, code),
        _ => job.status.to_string(),
    };
    format!("[{}] {:<14} {}", job.id, status, job.line)
}
