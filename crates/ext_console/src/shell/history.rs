//! Command history
//!
//! The orchestrator appends one [`HistoryEntry`] per executed line to a
//! [`HistoryStore`]. Durable stores live outside this crate; the bundled
//! [`InMemoryHistory`] is a bounded ring that drops the oldest entries.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One executed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Sequence number assigned by the store
    pub id: u64,
    /// Resolved command name; multi-word built-ins keep all their words
    pub command: String,
    pub args: Vec<String>,
    /// Line as submitted, before alias expansion
    pub line: String,
    pub working_directory: PathBuf,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Truncated output snapshot
    pub output: String,
    /// Truncated error snapshot
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Command name and arguments joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Sink for executed lines.
pub trait HistoryStore: Send + Sync {
    /// Store an entry. The store assigns `id`.
    fn append(&self, entry: HistoryEntry);

    /// The last `limit` entries, oldest first.
    fn recent(&self, limit: usize) -> Vec<HistoryEntry>;

    /// Entries whose line or resolved command contains `query`, oldest first.
    fn search(&self, query: &str) -> Vec<HistoryEntry>;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory history.
pub struct InMemoryHistory {
    state: Mutex<HistoryState>,
    capacity: usize,
}

#[derive(Default)]
struct HistoryState {
    entries: VecDeque<HistoryEntry>,
    next_id: u64,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HistoryStore for InMemoryHistory {
    fn append(&self, mut entry: HistoryEntry) {
        let mut state = self.lock();
        state.next_id += 1;
        entry.id = state.next_id;
        state.entries.push_back(entry);
        while state.entries.len() > self.capacity {
            state.entries.pop_front();
        }
    }

    fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let state = self.lock();
        let skip = state.entries.len().saturating_sub(limit);
        state.entries.iter().skip(skip).cloned().collect()
    }

    fn search(&self, query: &str) -> Vec<HistoryEntry> {
        let query = query.to_lowercase();
        self.lock()
            .entries
            .iter()
            .filter(|e| {
                e.line.to_lowercase().contains(&query)
                    || e.command_line().to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.lock().entries.clear();
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_snapshot(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
