//! Core types for console execution
//!
//! - `ShellContext` - working directory, environment, aliases and shell variables
//! - `EnvChange` - context modifications requested by built-in commands
//! - `ExecutionResult` - the structured outcome of every submitted line
//! - Exit code conventions

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::ConsoleConfig;
use crate::ConsoleError;

// ============================================================================
// Exit Codes
// ============================================================================

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_CANCELLED: i32 = 130;

// ============================================================================
// Shell Context
// ============================================================================

/// Mutable execution environment of one console instance.
///
/// Owned by exactly one orchestrator. Built-ins never mutate it directly;
/// they return [`EnvChange`] lists that the orchestrator applies after a
/// foreground line completes. Background jobs run against a clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellContext {
    pub working_directory: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, String>,
    pub shell_variables: BTreeMap<String, String>,
    pub home_directory: PathBuf,
}

impl ShellContext {
    /// Create a context rooted at `cwd` with an empty environment.
    pub fn new(cwd: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        let mut context = Self {
            working_directory: PathBuf::new(),
            environment: BTreeMap::new(),
            aliases: BTreeMap::new(),
            shell_variables: BTreeMap::new(),
            home_directory: home.into(),
        };
        context.set_cwd(normalize_path(&cwd.into()));
        context
    }

    /// Create a context seeded from configuration.
    pub fn from_config(config: &ConsoleConfig, cwd: impl Into<PathBuf>) -> Self {
        let mut context = Self::new(cwd, config.home_directory.clone());

        if config.inherit_environment {
            for (name, value) in std::env::vars() {
                if name != "PWD" {
                    context.environment.insert(name, value);
                }
            }
        }
        for (name, value) in &config.environment {
            context.environment.insert(name.clone(), value.clone());
        }
        context
            .environment
            .insert("HOME".to_string(), config.home_directory.display().to_string());
        context.aliases = config.aliases.clone();
        context
    }

    pub fn cwd(&self) -> &Path {
        &self.working_directory
    }

    /// Look up a variable, environment first, then shell-local.
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.environment
            .get(name)
            .or_else(|| self.shell_variables.get(name))
            .map(String::as_str)
    }

    /// Resolve a path argument against the working directory.
    ///
    /// The result is normalized lexically; symlinks are not resolved.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = if path == "~" {
            self.home_directory.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            self.home_directory.join(rest)
        } else {
            PathBuf::from(path)
        };

        if expanded.is_absolute() {
            normalize_path(&expanded)
        } else {
            normalize_path(&self.working_directory.join(expanded))
        }
    }

    /// Apply multiple context changes in order.
    pub fn apply_changes(&mut self, changes: &[EnvChange]) {
        for change in changes {
            self.apply_change(change);
        }
    }

    /// Apply a single context change.
    pub fn apply_change(&mut self, change: &EnvChange) {
        match change {
            EnvChange::SetEnvVar(name, value) => {
                self.shell_variables.remove(name);
                self.environment.insert(name.clone(), value.clone());
            }
            EnvChange::SetShellVar(name, value) => {
                // An exported variable stays exported when reassigned.
                if let Some(existing) = self.environment.get_mut(name) {
                    *existing = value.clone();
                } else {
                    self.shell_variables.insert(name.clone(), value.clone());
                }
            }
            EnvChange::UnsetVar(name) => {
                self.shell_variables.remove(name);
                self.environment.remove(name);
            }
            EnvChange::Cd(dir) => {
                let old = self.working_directory.display().to_string();
                self.environment.insert("OLDPWD".to_string(), old);
                self.set_cwd(dir.clone());
            }
            EnvChange::SetAlias(name, expansion) => {
                self.aliases.insert(name.clone(), expansion.clone());
            }
            EnvChange::UnsetAlias(name) => {
                self.aliases.remove(name);
            }
        }
    }

    fn set_cwd(&mut self, cwd: PathBuf) {
        self.environment
            .insert("PWD".to_string(), cwd.display().to_string());
        self.working_directory = cwd;
    }
}

/// Lexically normalize a path: `.` is dropped and `..` pops a component.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

// ============================================================================
// Environment Changes
// ============================================================================

/// A change to the shell context requested by a built-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EnvChange {
    /// `export NAME=value`
    SetEnvVar(String, String),
    /// `set NAME value`
    SetShellVar(String, String),
    /// `unset NAME`
    UnsetVar(String),
    /// `cd path`; records the previous directory as OLDPWD
    Cd(PathBuf),
    /// `alias name=expansion`
    SetAlias(String, String),
    /// `unalias name`
    UnsetAlias(String),
}

// ============================================================================
// Execution Result
// ============================================================================

/// Structured outcome of one submitted line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub background_job_id: Option<String>,
    pub interactive_session_id: Option<String>,
    /// Index of the pipeline stage that stopped execution
    pub failed_stage: Option<usize>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: EXIT_SUCCESS,
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            exit_code,
            ..Default::default()
        }
    }

    pub fn not_found(command: &str) -> Self {
        Self::failure(EXIT_NOT_FOUND, format!("command not found: {}", command))
    }

    pub fn cancelled() -> Self {
        Self::failure(EXIT_CANCELLED, "cancelled")
    }

    pub fn from_error(error: &ConsoleError) -> Self {
        Self::failure(error.exit_code(), error.message().to_string())
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ShellContext {
        ShellContext::new("/a/b/c", "/home/ops")
    }

    #[test]
    fn test_resolve_path() {
        let ctx = context();
        assert_eq!(ctx.resolve_path(".."), PathBuf::from("/a/b"));
        assert_eq!(ctx.resolve_path("../../x/./y"), PathBuf::from("/a/x/y"));
        assert_eq!(ctx.resolve_path("/etc/../var"), PathBuf::from("/var"));
        assert_eq!(ctx.resolve_path("~"), PathBuf::from("/home/ops"));
        assert_eq!(ctx.resolve_path("~/logs"), PathBuf::from("/home/ops/logs"));
        assert_eq!(ctx.resolve_path("/../.."), PathBuf::from("/"));
    }

    #[test]
    fn test_cd_records_oldpwd() {
        let mut ctx = context();
        ctx.apply_change(&EnvChange::Cd(PathBuf::from("/tmp")));
        assert_eq!(ctx.cwd(), Path::new("/tmp"));
        assert_eq!(ctx.get_var("OLDPWD"), Some("/a/b/c"));
        assert_eq!(ctx.get_var("PWD"), Some("/tmp"));
    }

    #[test]
    fn test_shell_var_respects_export() {
        let mut ctx = context();
        ctx.apply_changes(&[
            EnvChange::SetShellVar("LOCAL".into(), "1".into()),
            EnvChange::SetEnvVar("SHARED".into(), "a".into()),
            EnvChange::SetShellVar("SHARED".into(), "b".into()),
        ]);
        assert_eq!(ctx.shell_variables.get("LOCAL").map(String::as_str), Some("1"));
        assert!(!ctx.environment.contains_key("LOCAL"));
        assert_eq!(ctx.environment.get("SHARED").map(String::as_str), Some("b"));

        ctx.apply_change(&EnvChange::UnsetVar("SHARED".into()));
        assert_eq!(ctx.get_var("SHARED"), None);
    }

    #[test]
    fn test_alias_changes() {
        let mut ctx = context();
        ctx.apply_change(&EnvChange::SetAlias("ll".into(), "ls -la".into()));
        assert_eq!(ctx.aliases.get("ll").map(String::as_str), Some("ls -la"));
        ctx.apply_change(&EnvChange::UnsetAlias("ll".into()));
        assert!(ctx.aliases.is_empty());
    }

    #[test]
    fn test_from_config_layers_environment() {
        let mut config = ConsoleConfig::default();
        config.inherit_environment = false;
        config.home_directory = PathBuf::from("/home/ops");
        config.environment.insert("CAPTURE".into(), "on".into());
        config.aliases.insert("l".into(), "ls".into());

        let ctx = ShellContext::from_config(&config, "/srv");
        assert_eq!(ctx.get_var("CAPTURE"), Some("on"));
        assert_eq!(ctx.get_var("HOME"), Some("/home/ops"));
        assert_eq!(ctx.get_var("PWD"), Some("/srv"));
        assert_eq!(ctx.aliases.len(), 1);
    }

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::success("hello");
        assert!(ok.success);
        assert_eq!(ok.exit_code, 0);

        let missing = ExecutionResult::not_found("nosuch");
        assert_eq!(missing.exit_code, 127);
        assert!(!missing.success);

        let err = ExecutionResult::from_error(&ConsoleError::job_not_found("job-9"));
        assert_eq!(err.exit_code, 1);
        assert_eq!(err.error_message.as_deref(), Some("job-9"));

        assert_eq!(ExecutionResult::cancelled().exit_code, 130);
    }
}
