use crate::completion::{is_completed, CompletionStore};
use crate::config::{CompletionKey, DispatchConfig};
use crate::discovery::{discover_instances, key_collisions, Instance, NamePattern};
use crate::executor::{
    stream_tail, write_execution_record, ArtifactPaths, ExecutionResult, SolverExecutor,
};
use crate::summary::{InstanceOutcome, InstanceStatus, RunSummary};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub fn record_outcome(
    instance: &Instance,
    result: &ExecutionResult,
    store: &mut dyn CompletionStore,
    policy: CompletionKey,
) -> Result<()> {
    if result.success() {
        let key = instance.key(policy);
        store
            .append(key)
            .with_context(|| format!("failed to record completion of {}", key))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstance {
    pub instance: Instance,
    pub completed: bool,
}

pub struct Dispatcher<S, E> {
    config: DispatchConfig,
    store: S,
    executor: E,
    interrupt: Arc<AtomicBool>,
}

impl<S: CompletionStore, E: SolverExecutor> Dispatcher<S, E> {
    pub fn new(config: DispatchConfig, store: S, executor: E) -> Self {
        Self {
            config,
            store,
            executor,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn discover(&self, prefix: Option<&str>) -> Result<Vec<Instance>> {
        let pattern = NamePattern::new(prefix, &self.config.suffix);
        let instances = discover_instances(&self.config.input_dir, &pattern)?;
        if self.config.completion_key == CompletionKey::BaseName {
            for group in key_collisions(&instances, CompletionKey::BaseName) {
                let ids: Vec<&str> = group.iter().map(|i| i.id.as_str()).collect();
                tracing::warn!(
                    key = %group[0].base_name,
                    instances = ?ids,
                    "instances share a completion key; solving one marks all as solved"
                );
            }
        }
        Ok(instances)
    }

    pub fn plan(&self, prefix: Option<&str>) -> Result<Vec<PlannedInstance>> {
        self.discover(prefix)?
            .into_iter()
            .map(|instance| {
                let completed =
                    is_completed(&instance, &self.store, self.config.completion_key)?;
                Ok(PlannedInstance {
                    instance,
                    completed,
                })
            })
            .collect()
    }

    pub fn dispatch_one(&mut self, instance: Instance) -> Result<InstanceOutcome> {
        let policy = self.config.completion_key;
        let paths = ArtifactPaths::new(&self.config.log_dir, &instance, policy);
        let started = Instant::now();
        let result = match self.executor.execute(&instance) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(instance = %instance.id, error = %format!("{:#}", err), "solver could not be started");
                return Ok(InstanceOutcome {
                    instance,
                    status: InstanceStatus::Failed,
                    exit_code: None,
                    elapsed: started.elapsed(),
                    diagnostics: Some(format!("{:#}", err)),
                });
            }
        };

        if let Err(err) =
            write_execution_record(&paths.record, &instance, instance.key(policy), &result)
        {
            tracing::warn!(instance = %instance.id, error = %err, "failed to write execution record");
        }
        record_outcome(&instance, &result, &mut self.store, policy)?;

        let elapsed_ms = result.elapsed.as_millis() as u64;
        if result.success() {
            tracing::info!(instance = %instance.id, elapsed_ms, "instance solved");
            Ok(InstanceOutcome {
                instance,
                status: InstanceStatus::Solved,
                exit_code: result.exit_code,
                elapsed: result.elapsed,
                diagnostics: None,
            })
        } else {
            let label = result.status_label();
            let diagnostics = match stream_tail(&result.stderr_path) {
                Some(tail) => format!("{}: {}", label, tail),
                None => label,
            };
            tracing::warn!(
                instance = %instance.id,
                exit_code = ?result.exit_code,
                signal = ?result.signal,
                elapsed_ms,
                "instance failed"
            );
            Ok(InstanceOutcome {
                instance,
                status: InstanceStatus::Failed,
                exit_code: result.exit_code,
                elapsed: result.elapsed,
                diagnostics: Some(diagnostics),
            })
        }
    }

    /// Discovers instances, then skips or dispatches each in order.
    ///
    /// `on_outcome` receives every outcome as soon as it is known, with the
    /// instance's 1-based position and the total count. Per-instance
    /// failures are counted, never propagated; only failing to persist the
    /// completion set aborts the run.
    pub fn run_all<F>(&mut self, prefix: Option<&str>, mut on_outcome: F) -> Result<RunSummary>
    where
        F: FnMut(usize, usize, &InstanceOutcome),
    {
        let started = Instant::now();
        let instances = self.discover(prefix)?;
        let total = instances.len();
        let mut summary = RunSummary::new(total);
        if total == 0 {
            tracing::warn!(
                input_dir = %self.config.input_dir.display(),
                prefix = prefix.unwrap_or(""),
                "no instances match"
            );
        }
        tracing::info!(total, "dispatch started");

        for (idx, instance) in instances.into_iter().enumerate() {
            if self.interrupt.load(Ordering::Relaxed) {
                tracing::warn!(remaining = total - idx, "interrupted, stopping before next instance");
                summary.interrupt();
                break;
            }
            let outcome = if is_completed(&instance, &self.store, self.config.completion_key)? {
                tracing::debug!(instance = %instance.id, "already solved, skipping");
                InstanceOutcome::skipped(instance)
            } else {
                self.dispatch_one(instance)?
            };
            summary.record(&outcome);
            on_outcome(idx + 1, total, &outcome);
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            solved = summary.solved,
            skipped = summary.skipped,
            failed = summary.failed,
            not_started = summary.not_started,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "dispatch finished"
        );
        debug_assert!(summary.is_consistent());
        Ok(summary)
    }
}
