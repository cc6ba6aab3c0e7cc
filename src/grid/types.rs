use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Option key under which a task names the handler that should process it.
pub const HANDLER_OPTION: &str = "handler";

/// Opaque identifier of a result slot in the grid.
///
/// Payload blobs and task outputs share this namespace: a payload is simply a
/// result created with its data already attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultHandle(pub String);

impl ResultHandle {
    /// Mints a fresh UUID v4-based handle.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ResultHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a task within the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope to which every result and task belongs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduling options attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOptions {
    /// Upper bound on a single execution attempt.
    pub max_duration: Duration,
    /// How many times a task whose lease expired may be handed out again.
    pub max_retries: u32,
    /// Higher priorities are dispatched first.
    pub priority: u32,
    /// Only workers bound to this partition pick the task up.
    pub partition_id: String,
    /// Free-form application options (e.g. the handler name).
    pub options: BTreeMap<String, String>,
}

impl TaskOptions {
    pub fn with_handler(mut self, handler: &str) -> Self {
        self.options
            .insert(HANDLER_OPTION.to_string(), handler.to_string());
        self
    }

    pub fn with_partition(mut self, partition_id: &str) -> Self {
        self.partition_id = partition_id.to_string();
        self
    }

    pub fn handler(&self) -> Option<&str> {
        self.options.get(HANDLER_OPTION).map(String::as_str)
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(60 * 60),
            max_retries: 2,
            priority: 1,
            partition_id: "default".to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// What a submitter hands to the queue for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    /// Blob holding the serialized input.
    pub payload: ResultHandle,
    /// Results this task is responsible for writing.
    pub expected_outputs: Vec<ResultHandle>,
    /// Results that must be resolved before the task may be dispatched.
    pub data_dependencies: Vec<ResultHandle>,
    /// Overrides the batch-level options when set.
    pub options: Option<TaskOptions>,
    /// Running task handing its own pending outputs over to this one.
    #[serde(default)]
    pub delegated_by: Option<TaskId>,
}

impl TaskDescriptor {
    pub fn new(payload: ResultHandle, expected_output: ResultHandle) -> Self {
        Self {
            payload,
            expected_outputs: vec![expected_output],
            data_dependencies: Vec::new(),
            options: None,
            delegated_by: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResultHandle>) -> Self {
        self.data_dependencies = dependencies;
        self
    }

    /// Marks the task as taking over outputs that `task_id` currently owns.
    pub fn delegated_by(mut self, task_id: TaskId) -> Self {
        self.delegated_by = Some(task_id);
        self
    }
}

/// Per-task answer to a batched submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SubmissionOutcome {
    Accepted(TaskId),
    Rejected { reason: String },
}

impl SubmissionOutcome {
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            SubmissionOutcome::Accepted(task_id) => Some(task_id),
            SubmissionOutcome::Rejected { .. } => None,
        }
    }
}

/// Lifecycle of a result slot. `Resolved` and `Failed` are terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResultStatus {
    Pending,
    Resolved,
    Failed { error: String },
}

/// Represents the lifecycle state of a task in the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    /// Submitted; dispatchable once every data dependency is resolved.
    Pending,
    /// Claimed by a worker. Accompanied by a `lease_expires` timestamp.
    Running,
    Completed,
    Failed { error: String },
}

/// Everything a worker receives for one task execution.
///
/// Dependencies are already resolved when an invocation is built: the grid
/// never hands out a task whose inputs are still pending.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub session: SessionId,
    pub task_id: TaskId,
    pub payload: Vec<u8>,
    pub expected_outputs: Vec<ResultHandle>,
    pub dependencies: HashMap<ResultHandle, Vec<u8>>,
    pub options: TaskOptions,
}

impl Invocation {
    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
