//! Live interactive processes
//!
//! Tracks the children started by [`ProcessExecutionService`] for interactive
//! sessions so they can be written to, killed individually, or all cleaned
//! up when the console shuts down.
//!
//! [`ProcessExecutionService`]: super::adapter::ProcessExecutionService

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;

/// Opaque handle to a process owned by an execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessHandle(pub u64);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Shared writer to a child's stdin.
pub type SharedStdin = Arc<tokio::sync::Mutex<ChildStdin>>;

struct TrackedProcess {
    pid: Option<u32>,
    stdin: Option<SharedStdin>,
    kill: CancellationToken,
}

/// Table of interactive children, keyed by handle.
#[derive(Clone, Default)]
pub struct ProcessTable {
    inner: Arc<ProcessTableInner>,
}

#[derive(Default)]
struct ProcessTableInner {
    processes: Mutex<HashMap<ProcessHandle, TrackedProcess>>,
    next_id: AtomicU64,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned child. The returned token is cancelled when
    /// the process is asked to terminate.
    pub fn register(
        &self,
        pid: Option<u32>,
        stdin: Option<ChildStdin>,
    ) -> (ProcessHandle, CancellationToken) {
        let handle = ProcessHandle(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let kill = CancellationToken::new();
        let tracked = TrackedProcess {
            pid,
            stdin: stdin.map(|s| Arc::new(tokio::sync::Mutex::new(s))),
            kill: kill.clone(),
        };
        self.lock().insert(handle, tracked);
        (handle, kill)
    }

    /// Stdin writer of a live process.
    pub fn stdin(&self, handle: ProcessHandle) -> Option<SharedStdin> {
        self.lock().get(&handle).and_then(|p| p.stdin.clone())
    }

    /// Request termination of one process. Returns false if unknown.
    pub fn kill(&self, handle: ProcessHandle) -> bool {
        match self.lock().get(&handle) {
            Some(process) => {
                process.kill.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a process once it has exited.
    pub fn remove(&self, handle: ProcessHandle) {
        self.lock().remove(&handle);
    }

    pub fn contains(&self, handle: ProcessHandle) -> bool {
        self.lock().contains_key(&handle)
    }

    /// OS process ids of all tracked children.
    pub fn pids(&self) -> Vec<u32> {
        self.lock().values().filter_map(|p| p.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ask every tracked process to terminate.
    pub fn kill_all(&self) {
        let processes = self.lock();
        for process in processes.values() {
            process.kill.cancel();
        }
        #[cfg(unix)]
        {
            for pid in processes.values().filter_map(|p| p.pid) {
                send_sigterm(pid);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProcessHandle, TrackedProcess>> {
        self.inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Send SIGTERM to a process id.
#[cfg(unix)]
pub fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "process.sigterm_failed");
    }
}
