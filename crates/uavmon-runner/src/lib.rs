//! Batch driver for the external UAV monitoring solver.
//!
//! Discovers instance files under an input root, runs the solver once per
//! instance that is not yet in the completion set, and reports a summary.
//! Execution is strictly sequential; running several dispatchers with
//! disjoint prefixes is the way to use more cores.

pub mod completion;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod executor;
pub mod summary;

use anyhow::Result;

pub use completion::{is_completed, CompletionStore, FileCompletionStore, MemoryCompletionStore};
pub use config::{install_root, CompletionKey, DispatchConfig, PreconditionError};
pub use discovery::{discover_instances, DiscoveryError, Instance, NamePattern};
pub use dispatch::{record_outcome, Dispatcher, PlannedInstance};
pub use executor::{ExecutionResult, ProcessExecutor, SolverExecutor};
pub use summary::{InstanceOutcome, InstanceStatus, RunSummary};

pub type FileDispatcher = Dispatcher<FileCompletionStore, ProcessExecutor>;

/// Checks preconditions, prepares output locations and opens the completion
/// file. Nothing is executed yet.
pub fn open_dispatcher(config: DispatchConfig) -> Result<FileDispatcher> {
    config.validate()?;
    config.prepare_outputs()?;
    let store = FileCompletionStore::open(&config.completion_file)?;
    let executor = ProcessExecutor::new(config.clone());
    Ok(Dispatcher::new(config, store, executor))
}

pub fn open_store(config: &DispatchConfig) -> Result<FileCompletionStore> {
    FileCompletionStore::open(&config.completion_file)
}
