//! Worker Pool Implementation
//!
//! Manages the lifecycle of task execution. It spawns background workers that continuously
//! poll the grid for dispatchable tasks of one partition.
//!
//! ## Responsibilities
//! - **Polling**: continuously checking for tasks whose dependencies are all resolved.
//! - **Lease Management**: Spawns a background task to renew leases during long-running operations.
//! - **Execution**: Invoking the appropriate handler from the `TaskHandlerRegistry`,
//!   bounded by the task's `max_duration`.

use super::registry::TaskHandlerRegistry;
use crate::config::ExecutorConfig;
use crate::grid::memory::InMemoryGrid;
use crate::grid::types::*;

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The engine that drives task execution.
pub struct TaskExecutor {
    /// Source of tasks and sink of completions.
    grid: Arc<InMemoryGrid>,
    /// Registry containing the actual code (closures) for tasks.
    handlers: Arc<TaskHandlerRegistry>,
    config: ExecutorConfig,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl TaskExecutor {
    /// Fails when `config` cannot keep the grid's leases alive.
    pub fn new(
        grid: Arc<InMemoryGrid>,
        handlers: Arc<TaskHandlerRegistry>,
        config: ExecutorConfig,
    ) -> Result<Arc<Self>> {
        config.validate(grid.lease_duration())?;
        Ok(Arc::new(Self {
            grid,
            handlers,
            config,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }))
    }

    /// Spawns the workers and returns immediately.
    ///
    /// Each worker runs until its handle is aborted or the runtime shuts down.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        tracing::info!(
            "Starting {} task workers on partition '{}'",
            self.config.worker_count,
            self.config.partition
        );

        (0..self.config.worker_count)
            .map(|worker_id| {
                let executor = self.clone();
                tokio::spawn(async move {
                    executor.worker_loop(worker_id).await;
                })
            })
            .collect()
    }

    /// Number of invocations whose handler returned successfully.
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Number of invocations whose handler failed or timed out.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// The main loop for a single worker.
    ///
    /// 1. Fetches dispatchable tasks of the executor's partition.
    /// 2. Attempts to "claim" one (atomic state change).
    /// 3. If claimed, executes it while maintaining a liveness lease.
    async fn worker_loop(&self, worker_id: usize) {
        let worker_name = format!("{}-worker-{}", self.config.partition, worker_id);
        tracing::info!("Worker {} started", worker_name);

        loop {
            let tasks = self.grid.dispatchable_tasks(&self.config.partition);

            if tasks.is_empty() {
                tokio::time::sleep(self.config.idle_backoff).await;
                continue;
            }

            tracing::trace!("Worker {} found {} available tasks", worker_name, tasks.len());

            let mut claimed = false;
            for (task_id, _) in tasks {
                match self.grid.try_claim_task(&task_id, &worker_name) {
                    Ok(Some(invocation)) => {
                        tracing::info!(
                            "Worker {} claimed task {} (handler: {:?})",
                            worker_name,
                            task_id,
                            invocation.options.handler()
                        );

                        self.execute_with_lease(&task_id, &worker_name, invocation).await;

                        claimed = true;
                        break; // Refresh the task list: completions may have unblocked others
                    }
                    Ok(None) => {
                        tracing::trace!("Task {} no longer available", task_id);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to claim task {}: {:#}", task_id, e);
                        continue;
                    }
                }
            }

            if !claimed {
                tokio::time::sleep(self.config.idle_backoff / 2).await;
            }
        }
    }

    /// Runs the handler with a lease heartbeat and reports the outcome.
    async fn execute_with_lease(&self, task_id: &TaskId, worker_name: &str, invocation: Invocation) {
        let renewal_handle = self.spawn_lease_renewal(task_id, worker_name);

        let max_duration = invocation.options.max_duration;
        let result = match tokio::time::timeout(max_duration, self.handlers.execute(invocation)).await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Task exceeded its max duration of {:?}",
                max_duration
            )),
        };

        renewal_handle.abort();

        match &result {
            Ok(()) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };

        if let Err(e) = self.grid.complete_task(task_id, worker_name, result) {
            tracing::error!("Failed to complete task {}: {:#}", task_id, e);
        }
    }

    /// Spawns a background task that periodically renews the lease of a running task.
    fn spawn_lease_renewal(&self, task_id: &TaskId, worker_name: &str) -> tokio::task::JoinHandle<()> {
        let grid = self.grid.clone();
        let task_id = task_id.clone();
        let worker_name = worker_name.to_string();
        let interval = self.config.lease_renewal;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if let Err(e) = grid.renew_lease(&task_id, &worker_name) {
                    tracing::trace!("Stopping lease renewal for task {}: {:#}", task_id, e);
                    break;
                }
            }
        })
    }
}
