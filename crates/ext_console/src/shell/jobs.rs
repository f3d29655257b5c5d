//! Job scheduler
//!
//! Runs foreground lines through the pipeline executor and tracks
//! background jobs started with a trailing `&`.
//!
//! A background job runs on its own tokio task against a snapshot of the
//! shell context taken at spawn time. Its status only moves forward:
//! `Running -> Completed | Failed | Cancelled`. Cancellation marks the job
//! immediately and signals a [`CancellationToken`] that is checked before
//! the pipeline starts and after it finishes, and is also forwarded to the
//! execution service so a running process gets killed.
//!
//! Terminal jobs are evicted once the retention period has passed.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::HistoryStore;
use super::pipeline::{PipelineExecutor, PipelineOutcome};
use super::registry::ShellServices;
use super::sessions::InteractiveSessionManager;
use super::types::{ExecutionResult, ShellContext, EXIT_FAILURE};
use crate::config::ConsoleConfig;
use crate::parser::ParsedLine;
use crate::ConsoleError;

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a background job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: String,
    /// Resolved command name
    pub command: String,
    pub args: Vec<String>,
    /// Full line as parsed, without the `&`
    pub line: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
}

struct Job {
    info: JobInfo,
    cancel: CancellationToken,
    result: watch::Sender<Option<ExecutionResult>>,
    started: Instant,
    sequence: u64,
}

/// Cheap-to-clone handle to one console's jobs.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    executor: PipelineExecutor,
    sessions: InteractiveSessionManager,
    history: Arc<dyn HistoryStore>,
    config: Arc<ConsoleConfig>,
    jobs: Mutex<HashMap<String, Job>>,
    next_id: AtomicU64,
}

impl JobScheduler {
    pub fn new(
        executor: PipelineExecutor,
        sessions: InteractiveSessionManager,
        history: Arc<dyn HistoryStore>,
        config: Arc<ConsoleConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                executor,
                sessions,
                history,
                config,
                jobs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.inner.executor
    }

    /// Collaborators handed to built-ins.
    pub(crate) fn services(&self) -> ShellServices {
        ShellServices {
            adapter: self.inner.executor.adapter().clone(),
            jobs: self.clone(),
            sessions: self.inner.sessions.clone(),
            history: self.inner.history.clone(),
            registry: self.inner.executor.registry().clone(),
            config: self.inner.config.clone(),
        }
    }

    /// Run a line in the foreground and wait for it.
    ///
    /// A panicking built-in is reported as a failed result.
    pub async fn execute(&self, line: &ParsedLine, context: &ShellContext) -> PipelineOutcome {
        let services = self.services();
        let cancel = CancellationToken::new();
        let run = self
            .inner
            .executor
            .run(&line.commands, context, &services, &cancel);
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(line = %line, error = %message, "job.foreground_panicked");
                PipelineOutcome {
                    result: ExecutionResult::failure(EXIT_FAILURE, message),
                    changes: Vec::new(),
                }
            }
        }
    }

    /// Start `line` as a background job and return its id immediately.
    ///
    /// Fails with `ConcurrencyLimitExceeded`, creating nothing, when the
    /// running-job ceiling is reached.
    pub fn execute_in_background(
        &self,
        line: ParsedLine,
        context: &ShellContext,
    ) -> Result<String, ConsoleError> {
        let (command, args) = line
            .first()
            .map(|stage| self.inner.executor.resolve_name(stage))
            .unwrap_or_default();
        let cancel = CancellationToken::new();
        let (result_tx, _) = watch::channel(None);

        let id = {
            let mut jobs = self.lock();
            let running = jobs
                .values()
                .filter(|job| job.info.status == JobStatus::Running)
                .count();
            let limit = self.inner.config.max_concurrent_jobs;
            if running >= limit {
                warn!(running, limit, "job.rejected");
                return Err(ConsoleError::concurrency_limit_exceeded(format!(
                    "{} of {} background jobs already running",
                    running, limit
                )));
            }

            let sequence = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("job-{}", sequence);
            let job = Job {
                info: JobInfo {
                    id: id.clone(),
                    command,
                    args,
                    line: line.command_text(),
                    status: JobStatus::Running,
                    started_at: Utc::now(),
                    ended_at: None,
                    exit_code: None,
                    output: String::new(),
                    error: None,
                },
                cancel: cancel.clone(),
                result: result_tx,
                started: Instant::now(),
                sequence,
            };
            jobs.insert(id.clone(), job);
            id
        };
        info!(job_id = %id, line = %line, "job.spawn");

        let scheduler = self.clone();
        let snapshot = context.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }

            let services = scheduler.services();
            let run = scheduler
                .inner
                .executor
                .run(&line.commands, &snapshot, &services, &cancel);
            let outcome = AssertUnwindSafe(run).catch_unwind().await;

            if cancel.is_cancelled() {
                debug!(job_id = %job_id, "job.completed_after_cancel");
                return;
            }

            match outcome {
                Ok(outcome) => {
                    let status = if outcome.result.success {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    };
                    scheduler.finish(&job_id, status, outcome.result);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(job_id = %job_id, error = %message, "job.panicked");
                    scheduler.finish(
                        &job_id,
                        JobStatus::Failed,
                        ExecutionResult::failure(EXIT_FAILURE, message),
                    );
                }
            }
        });

        Ok(id)
    }

    /// Cancel a running job. Returns false, changing nothing, if the job is
    /// unknown or already terminal.
    pub fn cancel_job(&self, id: &str) -> bool {
        let cancelled = self.finish(id, JobStatus::Cancelled, ExecutionResult::cancelled());
        if cancelled {
            info!(job_id = %id, "job.cancelled");
        }
        cancelled
    }

    /// Wait for a job and return its result.
    ///
    /// Terminal jobs return their stored result; nothing is re-executed.
    pub async fn foreground_job(&self, id: &str) -> Result<ExecutionResult, ConsoleError> {
        let mut receiver = self
            .lock()
            .get(id)
            .map(|job| job.result.subscribe())
            .ok_or_else(|| ConsoleError::job_not_found(id))?;

        let result = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConsoleError::job_not_found(id))?;
        Ok(result.clone().unwrap_or_default())
    }

    /// Confirm that a job is running in the background.
    pub fn background_job(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|job| job.info.status == JobStatus::Running)
    }

    pub fn job(&self, id: &str) -> Option<JobInfo> {
        self.lock().get(id).map(|job| job.info.clone())
    }

    /// Every tracked job, oldest first.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.lock();
        let mut entries: Vec<&Job> = jobs.values().collect();
        entries.sort_by_key(|job| (job.started, job.sequence));
        entries.into_iter().map(|job| job.info.clone()).collect()
    }

    /// Terminal jobs, newest first.
    pub fn job_history(&self) -> Vec<JobInfo> {
        let jobs = self.lock();
        let mut entries: Vec<&Job> = jobs
            .values()
            .filter(|job| job.info.status.is_terminal())
            .collect();
        entries.sort_by_key(|job| std::cmp::Reverse((job.started, job.sequence)));
        entries.into_iter().map(|job| job.info.clone()).collect()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.list_jobs().into_iter().map(|job| job.id).collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|job| job.info.status == JobStatus::Running)
            .count()
    }

    /// Evict every terminal job now. Returns the number removed.
    pub fn clear_job_history(&self) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, job| job.info.status == JobStatus::Running);
        before - jobs.len()
    }

    /// Cancel every running job.
    pub fn cancel_all(&self) -> usize {
        let running: Vec<String> = self
            .lock()
            .values()
            .filter(|job| job.info.status == JobStatus::Running)
            .map(|job| job.info.id.clone())
            .collect();
        running.iter().filter(|id| self.cancel_job(id)).count()
    }

    /// Move a running job to a terminal status and publish its result.
    ///
    /// Returns false when the job is unknown or already terminal.
    fn finish(&self, id: &str, status: JobStatus, mut result: ExecutionResult) -> bool {
        {
            let mut jobs = self.lock();
            let Some(job) = jobs.get_mut(id) else {
                return false;
            };
            if job.info.status.is_terminal() {
                return false;
            }

            if status == JobStatus::Cancelled {
                job.cancel.cancel();
            }
            result.background_job_id = Some(id.to_string());
            result.execution_time_ms = job.started.elapsed().as_millis() as u64;

            job.info.status = status;
            job.info.ended_at = Some(Utc::now());
            job.info.exit_code = Some(result.exit_code);
            job.info.output = result.output.clone();
            job.info.error = result.error_message.clone();
            job.result.send_replace(Some(result));
        }
        debug!(job_id = %id, status = %status, "job.finished");

        self.schedule_eviction(id.to_string());
        true
    }

    fn schedule_eviction(&self, id: String) {
        let retention = self.inner.config.job_retention();
        let inner: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut jobs = inner.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            if jobs.get(&id).is_some_and(|job| job.info.status.is_terminal()) {
                jobs.remove(&id);
                debug!(job_id = %id, "job.evicted");
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
