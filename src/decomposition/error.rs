use crate::grid::client::GridError;
use crate::grid::types::{ResultHandle, TaskId};

use thiserror::Error;

/// Failures of a single decomposition invocation.
///
/// Nothing propagates across tasks: an error fails the invocation that raised
/// it and nothing else. Variants are ordered by how far the invocation got.
#[derive(Debug, Error)]
pub enum DecompositionError {
    /// The payload is not a work unit. Raised before any side effect.
    #[error("malformed work unit payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("invalid work unit: {0}")]
    InvalidWorkUnit(String),

    #[error("task must expect exactly one output, got {0}")]
    UnexpectedOutputs(usize),

    /// Handles or payloads could not be created. Nothing was submitted.
    #[error("could not register subtask results: {0}")]
    Registration(#[source] GridError),

    #[error("grid returned {actual} handles, expected {expected}")]
    HandleCount { expected: usize, actual: usize },

    /// The leaf batch was refused as a whole.
    #[error("leaf submission failed: {0}")]
    LeafSubmission(#[source] GridError),

    /// Some (possibly all) leaves were rejected. The aggregator was not
    /// submitted; accepted leaves run to completion on their own.
    #[error("{} leaf tasks rejected ({} accepted): {}", .rejected.len(), .accepted.len(), first_reason(.rejected))]
    LeafRejected {
        accepted: Vec<TaskId>,
        rejected: Vec<(ResultHandle, String)>,
    },

    /// Leaves are in the grid but nothing will ever combine them: the root
    /// result stays pending until its owner is failed.
    #[error("aggregation submission failed, {} leaf tasks orphaned: {reason}", .orphaned.len())]
    AggregationSubmission {
        orphaned: Vec<ResultHandle>,
        reason: String,
    },

    #[error("cannot combine values: {0}")]
    Combine(String),

    #[error("could not write result: {0}")]
    ResultWrite(#[source] GridError),
}

fn first_reason(rejected: &[(ResultHandle, String)]) -> &str {
    rejected
        .first()
        .map(|(_, reason)| reason.as_str())
        .unwrap_or_default()
}
