//! In-Memory Grid
//!
//! A single-process stand-in for the task grid. It owns three tables:
//! sessions, results (payload blobs and task outputs alike) and tasks.
//!
//! ## Responsibilities
//! - **Registration**: Minting result handles before anything references them.
//! - **Validation**: Rejecting, per task, submissions that name unknown or foreign handles.
//! - **Ownership**: Tracking which task is responsible for each pending result.
//!   Submitting a task that expects a result transfers that responsibility to it.
//! - **Dispatch**: Exposing only tasks whose data dependencies are all resolved.
//! - **Leasing**: Managing task ownership and timeouts for fault-tolerant execution.

use super::client::{GridError, ResultRegistry, TaskQueue};
use super::types::*;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

/// Lease granted to a worker on claim, renewed while the task runs.
pub const DEFAULT_LEASE_MS: u64 = 30_000;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub default_options: TaskOptions,
    pub created_at: u64,
}

#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub session: SessionId,
    pub status: ResultStatus,
    pub data: Option<Vec<u8>>,
    /// Task currently responsible for writing this result.
    pub owner: Option<TaskId>,
    pub created_at: u64,
}

/// The internal representation of a task stored within the grid.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub session: SessionId,
    pub payload: ResultHandle,
    pub expected_outputs: Vec<ResultHandle>,
    pub data_dependencies: Vec<ResultHandle>,
    pub options: TaskOptions,
    pub status: TaskStatus,
    /// The worker currently processing this task (if Running).
    pub assigned_to: Option<String>,
    /// Number of times the task has been claimed.
    pub attempts: u32,
    pub created_at: u64,
    /// If `now > lease_expires`, the task is considered abandoned and can be reclaimed.
    pub lease_expires: Option<u64>,
}

pub struct InMemoryGrid {
    sessions: DashMap<SessionId, SessionEntry>,
    results: DashMap<ResultHandle, ResultEntry>,
    tasks: DashMap<TaskId, TaskEntry>,
    lease_duration_ms: u64,
}

impl InMemoryGrid {
    pub fn new() -> Self {
        Self::with_lease_duration(DEFAULT_LEASE_MS)
    }

    pub fn with_lease_duration(lease_duration_ms: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            results: DashMap::new(),
            tasks: DashMap::new(),
            lease_duration_ms,
        }
    }

    /// How long a claim stays valid without renewal.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn create_session(&self, default_options: TaskOptions) -> SessionId {
        let session = SessionId::new();
        self.sessions.insert(
            session.clone(),
            SessionEntry {
                default_options,
                created_at: now_ms(),
            },
        );
        tracing::info!("Created session {}", session);
        session
    }

    pub fn session_options(&self, session: &SessionId) -> Option<TaskOptions> {
        self.sessions
            .get(session)
            .map(|entry| entry.default_options.clone())
    }

    fn ensure_session(&self, session: &SessionId) -> Result<(), GridError> {
        if self.sessions.contains_key(session) {
            Ok(())
        } else {
            Err(GridError::UnknownSession(session.clone()))
        }
    }

    fn insert_result(&self, session: &SessionId, data: Option<Vec<u8>>) -> ResultHandle {
        let handle = ResultHandle::new();
        let status = if data.is_some() {
            ResultStatus::Resolved
        } else {
            ResultStatus::Pending
        };
        self.results.insert(
            handle.clone(),
            ResultEntry {
                session: session.clone(),
                status,
                data,
                owner: None,
                created_at: now_ms(),
            },
        );
        handle
    }

    /// Status of a handle as seen from `session`, or why it cannot be referenced.
    fn status_in_session(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
    ) -> Result<ResultStatus, String> {
        let entry = self
            .results
            .get(handle)
            .ok_or_else(|| format!("result {} is not registered", handle))?;
        if &entry.session != session {
            return Err(format!("result {} belongs to another session", handle));
        }
        Ok(entry.status.clone())
    }

    /// Checks one descriptor against the registry. Each task of a batch is
    /// validated on its own so that one bad task does not sink the others.
    fn validate_descriptor(
        &self,
        session: &SessionId,
        descriptor: &TaskDescriptor,
    ) -> Result<(), String> {
        match self.status_in_session(session, &descriptor.payload)? {
            ResultStatus::Resolved => {}
            status => {
                return Err(format!(
                    "payload {} is not uploaded ({:?})",
                    descriptor.payload, status
                ))
            }
        }

        if descriptor.expected_outputs.is_empty() {
            return Err("task does not expect any output".to_string());
        }

        for output in &descriptor.expected_outputs {
            match self.status_in_session(session, output)? {
                ResultStatus::Pending => {}
                status => {
                    return Err(format!(
                        "expected output {} is already {:?}",
                        output, status
                    ))
                }
            }
            if descriptor.data_dependencies.contains(output) {
                return Err(format!("task depends on its own output {}", output));
            }
            self.check_delegation(descriptor, output)?;
        }

        for dependency in &descriptor.data_dependencies {
            self.status_in_session(session, dependency)?;
        }

        Ok(())
    }

    /// A pending output that already has an owner can only be taken over by a
    /// descriptor delegated by that owner, and only while the owner is running.
    fn check_delegation(
        &self,
        descriptor: &TaskDescriptor,
        output: &ResultHandle,
    ) -> Result<(), String> {
        let Some(owner) = self.results.get(output).and_then(|entry| entry.owner.clone()) else {
            return Ok(());
        };
        if descriptor.delegated_by.as_ref() != Some(&owner) {
            return Err(format!(
                "expected output {} is already owned by task {}",
                output, owner
            ));
        }
        match self.task_status(&owner) {
            Some(TaskStatus::Running) => Ok(()),
            status => Err(format!(
                "task {} cannot hand over {} while {:?}",
                owner, output, status
            )),
        }
    }

    /// Moves ownership of every expected output to `task_id`, all or nothing.
    ///
    /// Re-checks each owner under the entry lock, so of two submissions racing
    /// for the same output only one wins.
    fn transfer_outputs(&self, task_id: &TaskId, descriptor: &TaskDescriptor) -> Result<(), String> {
        let mut transferred: Vec<(ResultHandle, Option<TaskId>)> = Vec::new();

        for output in &descriptor.expected_outputs {
            let previous = match self.results.get_mut(output) {
                Some(mut entry)
                    if entry.status == ResultStatus::Pending
                        && (entry.owner.is_none() || entry.owner == descriptor.delegated_by) =>
                {
                    Some(entry.owner.replace(task_id.clone()))
                }
                _ => None,
            };

            match previous {
                Some(previous) => transferred.push((output.clone(), previous)),
                None => {
                    for (handle, owner) in transferred {
                        if let Some(mut entry) = self.results.get_mut(&handle) {
                            entry.owner = owner;
                        }
                    }
                    return Err(format!("expected output {} was taken concurrently", output));
                }
            }
        }

        Ok(())
    }

    fn dependencies_resolved(&self, dependencies: &[ResultHandle]) -> bool {
        dependencies.iter().all(|handle| {
            self.results
                .get(handle)
                .map(|entry| entry.status == ResultStatus::Resolved)
                .unwrap_or(false)
        })
    }

    /// Retrieves all tasks of `partition` that are eligible for execution.
    ///
    /// Eligible tasks are:
    /// 1. Status is `Pending` and every data dependency is `Resolved`.
    /// 2. Status is `Running` BUT the lease has expired (worker crashed).
    ///
    /// Higher priority first, then oldest first.
    pub fn dispatchable_tasks(&self, partition: &str) -> Vec<(TaskId, TaskEntry)> {
        let now = now_ms();
        let mut tasks: Vec<(TaskId, TaskEntry)> = self
            .tasks
            .iter()
            .filter(|entry| entry.options.partition_id == partition)
            .filter(|entry| match entry.status {
                TaskStatus::Pending => self.dependencies_resolved(&entry.data_dependencies),
                TaskStatus::Running => entry.lease_expires.map_or(false, |lease| now > lease),
                _ => false,
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        tasks.sort_by(|(_, a), (_, b)| {
            b.options
                .priority
                .cmp(&a.options.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks
    }

    /// Attempts to lock a dispatchable task for execution by `worker`.
    ///
    /// Returns `Ok(None)` when the task is no longer available (another worker
    /// won the race, or its dependencies are not all resolved). A task whose lease
    /// expired may be reclaimed until it has used up `max_retries`; after that it
    /// is failed instead.
    pub fn try_claim_task(&self, task_id: &TaskId, worker: &str) -> Result<Option<Invocation>> {
        let now = now_ms();

        let (session, payload, expected_outputs, dependencies, options) = {
            let mut entry = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| GridError::UnknownTask(task_id.clone()))?;

            let lease_expired = entry.lease_expires.map_or(false, |lease| now > lease);
            let status = entry.status.clone();
            match status {
                TaskStatus::Pending => {
                    if !self.dependencies_resolved(&entry.data_dependencies) {
                        return Ok(None);
                    }
                }
                TaskStatus::Running if lease_expired => {
                    if entry.attempts > entry.options.max_retries {
                        let error = format!("lease expired after {} attempts", entry.attempts);
                        entry.status = TaskStatus::Failed {
                            error: error.clone(),
                        };
                        entry.lease_expires = None;
                        let outputs = entry.expected_outputs.clone();
                        drop(entry);

                        tracing::error!("Task {} failed: {}", task_id, error);
                        self.fail_owned_outputs(task_id, &outputs, &error);
                        return Ok(None);
                    }
                    tracing::warn!(
                        "Reclaiming task {} from {:?} (attempt {})",
                        task_id,
                        entry.assigned_to,
                        entry.attempts + 1
                    );
                }
                _ => return Ok(None),
            }

            entry.status = TaskStatus::Running;
            entry.assigned_to = Some(worker.to_string());
            entry.attempts += 1;
            entry.lease_expires = Some(now + self.lease_duration_ms);

            (
                entry.session.clone(),
                entry.payload.clone(),
                entry.expected_outputs.clone(),
                entry.data_dependencies.clone(),
                entry.options.clone(),
            )
        };

        tracing::debug!("Claimed task {} for {}", task_id, worker);

        let payload = self.resolved_data(&payload)?;
        let mut resolved = HashMap::with_capacity(dependencies.len());
        for dependency in dependencies {
            let data = self.resolved_data(&dependency)?;
            resolved.insert(dependency, data);
        }

        Ok(Some(Invocation {
            session,
            task_id: task_id.clone(),
            payload,
            expected_outputs,
            dependencies: resolved,
            options,
        }))
    }

    fn resolved_data(&self, handle: &ResultHandle) -> Result<Vec<u8>, GridError> {
        let entry = self
            .results
            .get(handle)
            .ok_or_else(|| GridError::UnknownHandle(handle.clone()))?;
        match entry.status {
            ResultStatus::Resolved => Ok(entry.data.clone().unwrap_or_default()),
            ref status => Err(GridError::NotResolved {
                handle: handle.clone(),
                status: status.clone(),
            }),
        }
    }

    /// Extends the lease `worker` holds on a running task.
    pub fn renew_lease(&self, task_id: &TaskId, worker: &str) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| GridError::UnknownTask(task_id.clone()))?;

        if entry.status != TaskStatus::Running {
            return Err(anyhow::anyhow!(
                "Task not running (status: {:?})",
                entry.status
            ));
        }
        ensure_lease_holder(task_id, &entry, worker)?;
        entry.lease_expires = Some(now_ms() + self.lease_duration_ms);
        tracing::trace!("Renewed lease for task {}", task_id);
        Ok(())
    }

    /// Marks a running task as either `Completed` or `Failed`.
    ///
    /// A task that returns successfully while still owning a pending expected
    /// output has not done its job and is failed. Outputs owned by a failed
    /// task are failed with it, so their waiters do not hang.
    ///
    /// Only the worker holding the current lease may complete the task. A
    /// worker whose lease expired and was reclaimed gets an error.
    pub fn complete_task(&self, task_id: &TaskId, worker: &str, result: Result<()>) -> Result<()> {
        let (outputs, status) = {
            let mut entry = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| GridError::UnknownTask(task_id.clone()))?;

            if entry.status != TaskStatus::Running {
                return Err(anyhow::anyhow!(
                    "Task not running (status: {:?})",
                    entry.status
                ));
            }
            ensure_lease_holder(task_id, &entry, worker)?;

            let status = match result {
                Ok(()) => {
                    let unproduced = self.unproduced_outputs(task_id, &entry.expected_outputs);
                    match unproduced.first() {
                        None => TaskStatus::Completed,
                        Some(handle) => TaskStatus::Failed {
                            error: format!("expected output {} not produced", handle),
                        },
                    }
                }
                Err(e) => TaskStatus::Failed {
                    error: format!("{:#}", e),
                },
            };

            entry.status = status.clone();
            entry.lease_expires = None;
            (entry.expected_outputs.clone(), status)
        };

        match status {
            TaskStatus::Failed { error } => {
                tracing::error!("Task {} failed: {}", task_id, error);
                self.fail_owned_outputs(task_id, &outputs, &error);
            }
            _ => tracing::info!("Task {} completed", task_id),
        }

        Ok(())
    }

    fn unproduced_outputs(&self, task_id: &TaskId, outputs: &[ResultHandle]) -> Vec<ResultHandle> {
        outputs
            .iter()
            .filter(|handle| {
                self.results
                    .get(*handle)
                    .map(|entry| {
                        entry.status == ResultStatus::Pending
                            && entry.owner.as_ref() == Some(task_id)
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn fail_owned_outputs(&self, task_id: &TaskId, outputs: &[ResultHandle], error: &str) {
        for handle in outputs {
            if let Some(mut entry) = self.results.get_mut(handle) {
                if entry.status == ResultStatus::Pending && entry.owner.as_ref() == Some(task_id) {
                    entry.status = ResultStatus::Failed {
                        error: error.to_string(),
                    };
                }
            }
        }
    }

    pub fn task(&self, task_id: &TaskId) -> Option<TaskEntry> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|entry| entry.status.clone())
    }

    pub fn result_status(&self, handle: &ResultHandle) -> Option<ResultStatus> {
        self.results.get(handle).map(|entry| entry.status.clone())
    }

    pub fn result_owner(&self, handle: &ResultHandle) -> Option<TaskId> {
        self.results.get(handle).and_then(|entry| entry.owner.clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_status_counts(&self) -> (usize, usize, usize, usize) {
        let mut pending = 0;
        let mut running = 0;
        let mut completed = 0;
        let mut failed = 0;

        for entry in self.tasks.iter() {
            match entry.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Running => running += 1,
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed { .. } => failed += 1,
            }
        }

        (pending, running, completed, failed)
    }

    /// Polls until `handle` is resolved, failed, or `timeout` elapses.
    pub async fn wait_for_result(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.get_result(session, handle).await {
                Ok(data) => return Ok(data),
                Err(GridError::NotResolved {
                    status: ResultStatus::Failed { error },
                    ..
                }) => {
                    return Err(anyhow::anyhow!("Result {} failed: {}", handle, error));
                }
                Err(GridError::NotResolved { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow::anyhow!(
                    "Timed out after {:?} waiting for result {}",
                    timeout,
                    handle
                ));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

fn ensure_lease_holder(task_id: &TaskId, entry: &TaskEntry, worker: &str) -> Result<()> {
    if entry.assigned_to.as_deref() != Some(worker) {
        return Err(anyhow::anyhow!(
            "Task {} is leased to {:?}, not {}",
            task_id,
            entry.assigned_to,
            worker
        ));
    }
    Ok(())
}

impl Default for InMemoryGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultRegistry for InMemoryGrid {
    async fn create_result_placeholders(
        &self,
        session: &SessionId,
        count: usize,
    ) -> Result<Vec<ResultHandle>, GridError> {
        self.ensure_session(session)?;
        let handles: Vec<ResultHandle> =
            (0..count).map(|_| self.insert_result(session, None)).collect();
        tracing::debug!("Registered {} result placeholders in {}", count, session);
        Ok(handles)
    }

    async fn create_results_with_data(
        &self,
        session: &SessionId,
        blobs: Vec<Vec<u8>>,
    ) -> Result<Vec<ResultHandle>, GridError> {
        self.ensure_session(session)?;
        let handles: Vec<ResultHandle> = blobs
            .into_iter()
            .map(|blob| self.insert_result(session, Some(blob)))
            .collect();
        tracing::debug!("Uploaded {} payloads in {}", handles.len(), session);
        Ok(handles)
    }

    async fn send_result(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
        data: Vec<u8>,
    ) -> Result<(), GridError> {
        let mut entry = self
            .results
            .get_mut(handle)
            .ok_or_else(|| GridError::UnknownHandle(handle.clone()))?;

        if &entry.session != session {
            return Err(GridError::SessionMismatch {
                handle: handle.clone(),
            });
        }
        if entry.status != ResultStatus::Pending {
            return Err(GridError::AlreadyTerminal {
                handle: handle.clone(),
                status: entry.status.clone(),
            });
        }

        entry.data = Some(data);
        entry.status = ResultStatus::Resolved;
        tracing::debug!("Result {} resolved", handle);
        Ok(())
    }

    async fn get_result(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
    ) -> Result<Vec<u8>, GridError> {
        let entry = self
            .results
            .get(handle)
            .ok_or_else(|| GridError::UnknownHandle(handle.clone()))?;

        if &entry.session != session {
            return Err(GridError::SessionMismatch {
                handle: handle.clone(),
            });
        }
        match entry.status {
            ResultStatus::Resolved => Ok(entry.data.clone().unwrap_or_default()),
            ref status => Err(GridError::NotResolved {
                handle: handle.clone(),
                status: status.clone(),
            }),
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryGrid {
    async fn submit_tasks(
        &self,
        session: &SessionId,
        tasks: Vec<TaskDescriptor>,
        options: &TaskOptions,
    ) -> Result<Vec<SubmissionOutcome>, GridError> {
        self.ensure_session(session)?;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for descriptor in tasks {
            if let Err(reason) = self.validate_descriptor(session, &descriptor) {
                tracing::warn!("Rejected task submission in {}: {}", session, reason);
                outcomes.push(SubmissionOutcome::Rejected { reason });
                continue;
            }

            let task_id = TaskId::new();
            if let Err(reason) = self.transfer_outputs(&task_id, &descriptor) {
                tracing::warn!("Rejected task submission in {}: {}", session, reason);
                outcomes.push(SubmissionOutcome::Rejected { reason });
                continue;
            }
            if let Some(parent) = &descriptor.delegated_by {
                tracing::debug!("Task {} takes over outputs of task {}", task_id, parent);
            }

            self.tasks.insert(
                task_id.clone(),
                TaskEntry {
                    session: session.clone(),
                    payload: descriptor.payload,
                    expected_outputs: descriptor.expected_outputs,
                    data_dependencies: descriptor.data_dependencies,
                    options: descriptor.options.unwrap_or_else(|| options.clone()),
                    status: TaskStatus::Pending,
                    assigned_to: None,
                    attempts: 0,
                    created_at: now_ms(),
                    lease_expires: None,
                },
            );

            tracing::debug!("Stored task {} in session {}", task_id, session);
            outcomes.push(SubmissionOutcome::Accepted(task_id));
        }

        Ok(outcomes)
    }
}
