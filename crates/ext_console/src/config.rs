//! Console configuration
//!
//! Loaded from a TOML document. Every field has a default, so an empty
//! document (or no file at all) yields a usable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConsoleError;

/// Programs routed to an interactive session instead of a one-shot run.
pub const DEFAULT_INTERACTIVE_COMMANDS: &[&str] = &[
    "ssh", "telnet", "nc", "mysql", "psql", "redis-cli", "mongosh", "sqlite3", "python3", "node",
];

/// Runtime settings for one console instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Maximum number of background jobs running at once
    pub max_concurrent_jobs: usize,
    /// Seconds a finished job stays visible before eviction
    pub job_retention_secs: u64,
    /// Timeout applied to each external invocation
    pub command_timeout_ms: Option<u64>,
    /// Target of `cd` with no argument and `cd ~`
    pub home_directory: PathBuf,
    /// Number of history entries kept in memory
    pub history_limit: usize,
    /// Characters of output/error kept per history entry
    pub history_output_chars: usize,
    /// Extra program names accepted as system commands
    pub system_commands: Vec<String>,
    /// Programs started as interactive sessions
    pub interactive_commands: Vec<String>,
    /// Aliases preloaded into the shell context
    pub aliases: BTreeMap<String, String>,
    /// Variables layered over the inherited environment
    pub environment: BTreeMap<String, String>,
    /// Seed the context from the process environment
    pub inherit_environment: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            job_retention_secs: 300,
            command_timeout_ms: None,
            home_directory: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            history_limit: 1000,
            history_output_chars: 4096,
            system_commands: Vec::new(),
            interactive_commands: DEFAULT_INTERACTIVE_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aliases: BTreeMap::new(),
            environment: BTreeMap::new(),
            inherit_environment: true,
        }
    }
}

impl ConsoleConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConsoleError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConsoleError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConsoleError::config(format!("Failed to read config at {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConsoleError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConsoleError::config("max_concurrent_jobs must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(ConsoleError::config("history_limit must be at least 1"));
        }
        if self.command_timeout_ms == Some(0) {
            return Err(ConsoleError::config("command_timeout_ms must be positive"));
        }
        if !self.home_directory.is_absolute() {
            return Err(ConsoleError::config(format!(
                "home_directory must be absolute, got {}",
                self.home_directory.display()
            )));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// True when `command` should start an interactive session.
    pub fn is_interactive(&self, command: &str) -> bool {
        self.interactive_commands.iter().any(|c| c == command)
    }
}
