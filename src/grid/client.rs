//! Grid Client Interfaces
//!
//! The decomposition engine never talks to a concrete scheduler. It sees the
//! grid through two narrow, stateless request/response traits:
//!
//! - **`ResultRegistry`**: mints result placeholders, uploads payload blobs,
//!   writes results (once) and reads resolved results back.
//! - **`TaskQueue`**: submits batches of task descriptors and reports the
//!   outcome of every task in the batch individually.
//!
//! `GridClient` is the umbrella trait a worker needs; anything implementing
//! both halves gets it for free.

use super::types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by the grid itself.
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("unknown result handle {0}")]
    UnknownHandle(ResultHandle),

    #[error("result {handle} belongs to another session")]
    SessionMismatch { handle: ResultHandle },

    #[error("result {handle} is already {status:?}")]
    AlreadyTerminal {
        handle: ResultHandle,
        status: ResultStatus,
    },

    #[error("result {handle} is not resolved ({status:?})")]
    NotResolved {
        handle: ResultHandle,
        status: ResultStatus,
    },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

#[async_trait]
pub trait ResultRegistry: Send + Sync {
    /// Registers `count` pending result slots and returns their handles.
    ///
    /// Handles must be registered before any task references them, either as
    /// an expected output or as a data dependency.
    async fn create_result_placeholders(
        &self,
        session: &SessionId,
        count: usize,
    ) -> Result<Vec<ResultHandle>, GridError>;

    /// Uploads payload blobs. The returned handles are already resolved.
    async fn create_results_with_data(
        &self,
        session: &SessionId,
        blobs: Vec<Vec<u8>>,
    ) -> Result<Vec<ResultHandle>, GridError>;

    /// Writes the bytes of a pending result. A result is written exactly once.
    async fn send_result(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
        data: Vec<u8>,
    ) -> Result<(), GridError>;

    /// Reads a resolved result. Fails with `NotResolved` before that.
    async fn get_result(
        &self,
        session: &SessionId,
        handle: &ResultHandle,
    ) -> Result<Vec<u8>, GridError>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submits a batch of tasks.
    ///
    /// `options` apply to every descriptor that does not carry its own. The
    /// returned vector is aligned with `tasks`: a rejected task does not
    /// prevent the others in the batch from being accepted.
    async fn submit_tasks(
        &self,
        session: &SessionId,
        tasks: Vec<TaskDescriptor>,
        options: &TaskOptions,
    ) -> Result<Vec<SubmissionOutcome>, GridError>;
}

pub trait GridClient: ResultRegistry + TaskQueue {}

impl<T: ResultRegistry + TaskQueue> GridClient for T {}
