//! Decomposition Engine
//!
//! Processes one invocation of the subtasking handler. Every invocation is in
//! one of two states:
//!
//! - **Leaf-Dispatch**: a fresh work unit larger than its threshold. The engine
//!   registers one result per partition, submits one leaf task per partition,
//!   then submits an aggregation task that expects the invocation's own output
//!   and depends on every leaf result.
//! - **Resolve**: either a unit small enough to combine directly, or an
//!   aggregation invocation whose dependencies the grid has already resolved.
//!   The engine combines and writes the invocation's output.
//!
//! The engine never waits on anything: the grid only dispatches the
//! aggregation task once all its dependencies are resolved, which is what
//! turns a flat sequence of invocations into a recursion.

use super::aggregator::{combine, combine_dependencies, encode_value};
use super::error::DecompositionError;
use super::partitioner::split;
use super::types::*;
use crate::executor::registry::TaskHandlerRegistry;
use crate::grid::client::GridClient;
use crate::grid::types::*;

use std::sync::Arc;

pub struct DecompositionEngine {
    grid: Arc<dyn GridClient>,
}

impl DecompositionEngine {
    pub fn new(grid: Arc<dyn GridClient>) -> Arc<Self> {
        Arc::new(Self { grid })
    }

    /// Installs the engine as the handler for `handler_name`.
    ///
    /// Leaf and aggregation tasks inherit the invocation's options, so they
    /// are routed back to the same handler.
    pub fn register(self: &Arc<Self>, registry: &TaskHandlerRegistry, handler_name: &str) {
        let engine = self.clone();
        registry.register(handler_name, move |invocation: Invocation| {
            let engine = engine.clone();
            async move {
                engine.process(&invocation).await?;
                Ok(())
            }
        });
    }

    /// Decides what `invocation` has to do. Pure: no grid access.
    pub fn plan(invocation: &Invocation) -> Result<Plan, DecompositionError> {
        let root = match invocation.expected_outputs.as_slice() {
            [root] => root.clone(),
            outputs => return Err(DecompositionError::UnexpectedOutputs(outputs.len())),
        };
        let unit = WorkUnit::from_payload(&invocation.payload)?;

        if invocation.has_dependencies() {
            let value = combine_dependencies(&invocation.dependencies)?;
            return Ok(Plan::Emit {
                root,
                value,
                source: ValueSource::Dependencies(invocation.dependencies.len()),
            });
        }

        if unit.needs_split() {
            return Ok(Plan::Split {
                root,
                leaves: split(&unit),
                aggregation: unit,
            });
        }

        let value = combine(&unit.values)
            .ok_or_else(|| DecompositionError::Combine("work unit has no values".to_string()))?;
        Ok(Plan::Emit {
            root,
            value,
            source: ValueSource::Direct,
        })
    }

    /// Processes one task invocation end to end.
    pub async fn process(&self, invocation: &Invocation) -> Result<Outcome, DecompositionError> {
        match Self::plan(invocation)? {
            Plan::Emit {
                root,
                value,
                source,
            } => {
                tracing::debug!(
                    "Task {} resolving {} = {} ({:?})",
                    invocation.task_id,
                    root,
                    value,
                    source
                );
                self.grid
                    .send_result(&invocation.session, &root, encode_value(value))
                    .await
                    .map_err(DecompositionError::ResultWrite)?;
                Ok(Outcome::Resolved { root, value })
            }
            Plan::Split {
                root,
                leaves,
                aggregation,
            } => self.fan_out(invocation, root, leaves, aggregation).await,
        }
    }

    /// Registers, uploads and submits the leaves, then the aggregation task.
    async fn fan_out(
        &self,
        invocation: &Invocation,
        root: ResultHandle,
        leaves: Vec<SubUnit>,
        aggregation: WorkUnit,
    ) -> Result<Outcome, DecompositionError> {
        let session = &invocation.session;
        let options = &invocation.options;

        tracing::info!(
            "Task {} splitting {} values into {} subtasks (threshold {})",
            invocation.task_id,
            aggregation.size,
            leaves.len(),
            aggregation.threshold
        );

        // Serialize everything up front so a failure here has no side effects.
        let mut payloads = leaves
            .iter()
            .map(|leaf| leaf.unit.to_payload())
            .collect::<Result<Vec<_>, _>>()?;
        payloads.push(aggregation.to_payload()?);

        let leaf_handles = self
            .grid
            .create_result_placeholders(session, leaves.len())
            .await
            .map_err(DecompositionError::Registration)?;

        let mut payload_handles = self
            .grid
            .create_results_with_data(session, payloads)
            .await
            .map_err(DecompositionError::Registration)?;

        if leaf_handles.len() != leaves.len() {
            return Err(DecompositionError::HandleCount {
                expected: leaves.len(),
                actual: leaf_handles.len(),
            });
        }
        let uploaded = payload_handles.len();
        let aggregation_payload = match payload_handles.pop() {
            Some(handle) if uploaded == leaves.len() + 1 => handle,
            _ => {
                return Err(DecompositionError::HandleCount {
                    expected: leaves.len() + 1,
                    actual: uploaded,
                })
            }
        };

        tracing::debug!("Registered {} leaf results", leaf_handles.len());

        let descriptors: Vec<TaskDescriptor> = payload_handles
            .into_iter()
            .zip(&leaf_handles)
            .map(|(payload, leaf)| TaskDescriptor::new(payload, leaf.clone()))
            .collect();

        let outcomes = self
            .grid
            .submit_tasks(session, descriptors, options)
            .await
            .map_err(DecompositionError::LeafSubmission)?;
        let leaf_tasks = accepted_leaves(&leaf_handles, outcomes)?;

        tracing::debug!("Submitted {} leaf tasks", leaf_tasks.len());

        let aggregation_task = self
            .submit_aggregation(
                &invocation.task_id,
                session,
                options,
                &root,
                &leaf_handles,
                aggregation_payload,
            )
            .await
            .map_err(|reason| {
                tracing::error!(
                    "Task {} could not submit aggregation for {}; orphaned leaves: {:?}",
                    invocation.task_id,
                    root,
                    leaf_handles
                );
                DecompositionError::AggregationSubmission {
                    orphaned: leaf_handles.clone(),
                    reason,
                }
            })?;

        tracing::debug!(
            "Aggregation task {} now owns {}",
            aggregation_task,
            root
        );

        Ok(Outcome::Delegated {
            root,
            leaf_handles,
            leaf_tasks,
            aggregation_task,
        })
    }

    /// Submits the task that combines the leaves into `root`, handing `root`
    /// over from the splitting task.
    async fn submit_aggregation(
        &self,
        delegating_task: &TaskId,
        session: &SessionId,
        options: &TaskOptions,
        root: &ResultHandle,
        leaf_handles: &[ResultHandle],
        payload: ResultHandle,
    ) -> Result<TaskId, String> {
        let descriptor = TaskDescriptor::new(payload, root.clone())
            .with_dependencies(leaf_handles.to_vec())
            .delegated_by(delegating_task.clone());

        let outcome = self
            .grid
            .submit_tasks(session, vec![descriptor], options)
            .await
            .map_err(|e| e.to_string())?;

        match outcome.into_iter().next() {
            Some(SubmissionOutcome::Accepted(task_id)) => Ok(task_id),
            Some(SubmissionOutcome::Rejected { reason }) => Err(reason),
            None => Err("empty submission response".to_string()),
        }
    }
}

/// Task ids of the accepted leaves, or the per-leaf rejection report.
fn accepted_leaves(
    leaf_handles: &[ResultHandle],
    outcomes: Vec<SubmissionOutcome>,
) -> Result<Vec<TaskId>, DecompositionError> {
    let mut accepted = Vec::with_capacity(leaf_handles.len());
    let mut rejected = Vec::new();

    let mut outcomes = outcomes.into_iter();
    for handle in leaf_handles {
        match outcomes.next() {
            Some(SubmissionOutcome::Accepted(task_id)) => accepted.push(task_id),
            Some(SubmissionOutcome::Rejected { reason }) => rejected.push((handle.clone(), reason)),
            None => rejected.push((handle.clone(), "no submission outcome".to_string())),
        }
    }

    if rejected.is_empty() {
        Ok(accepted)
    } else {
        tracing::warn!(
            "{} leaf tasks rejected, {} accepted; not submitting aggregation",
            rejected.len(),
            accepted.len()
        );
        Err(DecompositionError::LeafRejected { accepted, rejected })
    }
}
