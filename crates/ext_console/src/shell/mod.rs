//! Shell execution engine
//!
//! - `types` - Shell context, context changes, execution results
//! - `registry` - Built-in command trait and name registry
//! - `commands` - Built-in shell commands
//! - `adapter` - Boundary to the host for processes and files
//! - `process_table` - Live interactive child processes
//! - `pipeline` - Stage-by-stage execution with redirects
//! - `jobs` - Background job scheduler
//! - `sessions` - Interactive session manager
//! - `history` - Command history store
//! - `orchestrator` - Entry point turning lines into results

pub mod adapter;
pub mod commands;
pub mod history;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod process_table;
pub mod registry;
pub mod sessions;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{OrchestratorBuilder, ShellOrchestrator};
pub use registry::{CommandOutput, CommandRegistry, ShellCommand, ShellCommandContext};
pub use types::{EnvChange, ExecutionResult, ShellContext};
