//! Client-side entry point: puts a root work unit on the grid.

use super::error::DecompositionError;
use super::types::WorkUnit;
use crate::grid::client::GridClient;
use crate::grid::types::*;

/// Registers the root result, uploads `unit` and submits the root task.
///
/// The returned handle is the one the caller waits on. It is never re-minted:
/// whichever invocation ends up resolving it, directly or through an
/// aggregation task, writes to this exact handle.
pub async fn submit_work_unit(
    grid: &dyn GridClient,
    session: &SessionId,
    unit: &WorkUnit,
    options: &TaskOptions,
) -> Result<(ResultHandle, TaskId), DecompositionError> {
    unit.validate()?;
    let payload = unit.to_payload()?;

    let root = grid
        .create_result_placeholders(session, 1)
        .await
        .map_err(DecompositionError::Registration)?
        .pop()
        .ok_or(DecompositionError::HandleCount {
            expected: 1,
            actual: 0,
        })?;
    let payload = grid
        .create_results_with_data(session, vec![payload])
        .await
        .map_err(DecompositionError::Registration)?
        .pop()
        .ok_or(DecompositionError::HandleCount {
            expected: 1,
            actual: 0,
        })?;

    let outcome = grid
        .submit_tasks(session, vec![TaskDescriptor::new(payload, root.clone())], options)
        .await
        .map_err(DecompositionError::LeafSubmission)?;

    match outcome.into_iter().next() {
        Some(SubmissionOutcome::Accepted(task_id)) => {
            tracing::info!("Submitted root task {} for result {}", task_id, root);
            Ok((root, task_id))
        }
        Some(SubmissionOutcome::Rejected { reason }) => Err(DecompositionError::LeafRejected {
            accepted: Vec::new(),
            rejected: vec![(root, reason)],
        }),
        None => Err(DecompositionError::LeafRejected {
            accepted: Vec::new(),
            rejected: vec![(root, "no submission outcome".to_string())],
        }),
    }
}
