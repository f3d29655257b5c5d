//! Interactive session manager
//!
//! An interactive session is one long-lived external process (a remote
//! shell, a database client) whose output is streamed as [`SessionEvent`]s
//! over a channel owned by the caller. Sessions have no concurrency ceiling.
//!
//! State moves `Starting -> Running -> Stopped`, or `Starting -> Error` when
//! the spawn fails. A session record is removed once it stops; an `Error`
//! record is kept for inspection until it is killed.
//!
//! Events are forwarded without waiting on the consumer. When the stream
//! buffer is full, further events are dropped (and logged) so that an
//! unread stream never stalls the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::adapter::{ExecutionService, ExternalRequest, ProcessHandle, SessionEvent};
use super::types::ShellContext;
use crate::ConsoleError;

/// Buffered events per session before the producer waits.
const EVENT_BUFFER: usize = 256;

/// Lifecycle state of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        };
        f.pad(s)
    }
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub state: SessionState,
    pub process_handle: Option<ProcessHandle>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Owns every interactive session of one console.
#[derive(Clone)]
pub struct InteractiveSessionManager {
    inner: Arc<SessionsInner>,
}

struct SessionsInner {
    adapter: Arc<dyn ExecutionService>,
    sessions: Mutex<HashMap<String, SessionInfo>>,
    next_id: AtomicU64,
}

impl InteractiveSessionManager {
    pub fn new(adapter: Arc<dyn ExecutionService>) -> Self {
        Self {
            inner: Arc::new(SessionsInner {
                adapter,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn `command` as an interactive session.
    ///
    /// Returns the session id and the receiving end of its event stream.
    /// The stream ends after [`SessionEvent::Close`].
    pub async fn start_session(
        &self,
        command: &str,
        args: Vec<String>,
        context: &ShellContext,
    ) -> Result<(String, mpsc::Receiver<SessionEvent>), ConsoleError> {
        let id = format!("session-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let info = SessionInfo {
            id: id.clone(),
            command: command.to_string(),
            args: args.clone(),
            state: SessionState::Starting,
            process_handle: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.lock().insert(id.clone(), info);

        let (adapter_tx, mut adapter_rx) = mpsc::channel(EVENT_BUFFER);
        let request = ExternalRequest::new(command, args, context);
        let handle = match self.inner.adapter.start_interactive(request, adapter_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_id = %id, command = %command, error = %e, "session.spawn_failed");
                // The record stays visible in `Error` until it is killed.
                if let Some(session) = self.lock().get_mut(&id) {
                    session.state = SessionState::Error;
                    session.ended_at = Some(Utc::now());
                }
                return Err(e);
            }
        };

        if let Some(session) = self.lock().get_mut(&id) {
            session.state = SessionState::Running;
            session.process_handle = Some(handle);
        }
        info!(session_id = %id, command = %command, %handle, "session.started");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let manager = self.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            let mut exit_code = None;
            let mut dropped = 0u64;
            while let Some(event) = adapter_rx.recv().await {
                let closing = matches!(event, SessionEvent::Close(_));
                if let SessionEvent::Close(code) = event {
                    exit_code = code;
                }
                // Never wait on the consumer; a full stream drops events.
                match tx.try_send(event) {
                    Ok(()) | Err(TrySendError::Closed(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        debug!(session_id = %session_id, dropped, "session.event_dropped");
                    }
                }
                if closing {
                    break;
                }
            }
            manager.finish(&session_id, exit_code);
        });

        Ok((id, rx))
    }

    /// Forward `data` to a running session's stdin.
    pub async fn write_to_session(&self, id: &str, data: &str) -> Result<(), ConsoleError> {
        let handle = {
            let sessions = self.lock();
            let session = sessions
                .get(id)
                .ok_or_else(|| ConsoleError::session_not_found(id))?;
            match (session.state, session.process_handle) {
                (SessionState::Running, Some(handle)) => handle,
                (state, _) => {
                    return Err(ConsoleError::session_not_running(format!(
                        "{} is {}",
                        id, state
                    )))
                }
            }
        };
        self.inner.adapter.write(handle, data.to_string()).await
    }

    /// Terminate a session and return its final `Stopped` snapshot.
    ///
    /// Also clears a session left in `Error` by a failed spawn. A process
    /// that exits on its own while being killed still counts as killed.
    pub async fn kill_session(&self, id: &str) -> Result<SessionInfo, ConsoleError> {
        let snapshot = self
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ConsoleError::session_not_found(id))?;

        if let Some(handle) = snapshot.process_handle {
            if let Err(e) = self.inner.adapter.kill(handle).await {
                debug!(session_id = %id, error = %e, "session.kill_failed");
            }
        }

        let mut session = self.lock().remove(id).unwrap_or(snapshot);
        session.state = SessionState::Stopped;
        session.ended_at = Some(Utc::now());
        info!(session_id = %id, "session.killed");
        Ok(session)
    }

    /// Terminate every live session.
    pub async fn kill_all(&self) {
        for id in self.ids() {
            let _ = self.kill_session(&id).await;
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.lock().get(id).cloned()
    }

    /// Live sessions sorted by start time.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn ids(&self) -> Vec<String> {
        self.list().into_iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Natural process exit: the session stops and its record is dropped.
    fn finish(&self, id: &str, exit_code: Option<i32>) {
        if self.lock().remove(id).is_some() {
            info!(session_id = %id, exit_code = ?exit_code, "session.closed");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionInfo>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
