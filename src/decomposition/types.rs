use super::error::DecompositionError;
use crate::grid::types::{ResultHandle, TaskId};

use serde::{Deserialize, Serialize};

/// The data a task is asked to reduce.
///
/// Serialized as `{"Size": .., "Threshold": .., "Values": [..]}` so payloads
/// produced by the existing grid clients deserialize unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct WorkUnit {
    pub size: u32,
    pub threshold: u32,
    pub values: Vec<u32>,
}

impl WorkUnit {
    pub fn new(values: Vec<u32>, threshold: u32) -> Self {
        Self {
            size: values.len() as u32,
            threshold,
            values,
        }
    }

    /// The table `1..=size`, the input the demo clients submit.
    pub fn sequence(size: u32, threshold: u32) -> Self {
        Self::new((1..=size).collect(), threshold)
    }

    /// Parses and validates a task payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecompositionError> {
        let unit: WorkUnit = serde_json::from_slice(payload)?;
        unit.validate()?;
        Ok(unit)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, DecompositionError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn validate(&self) -> Result<(), DecompositionError> {
        if self.threshold < 1 {
            return Err(DecompositionError::InvalidWorkUnit(
                "threshold must be at least 1".to_string(),
            ));
        }
        if self.size as usize != self.values.len() {
            return Err(DecompositionError::InvalidWorkUnit(format!(
                "size {} does not match {} values",
                self.size,
                self.values.len()
            )));
        }
        Ok(())
    }

    /// Whether this unit is too large to be combined in one step.
    pub fn needs_split(&self) -> bool {
        self.size > self.threshold
    }
}

/// One contiguous slice of a parent `WorkUnit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubUnit {
    pub offset: usize,
    pub unit: WorkUnit,
}

/// Where a directly emitted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Combined from the work unit's own values.
    Direct,
    /// Combined from this many resolved dependencies.
    Dependencies(usize),
}

/// What an invocation has to do, decided without touching the grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Fan out into leaf tasks and hand `root` to an aggregation task.
    Split {
        root: ResultHandle,
        leaves: Vec<SubUnit>,
        aggregation: WorkUnit,
    },
    /// Write `value` to `root`.
    Emit {
        root: ResultHandle,
        value: u32,
        source: ValueSource,
    },
}

/// What an invocation actually did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The root result was written by this invocation.
    Resolved { root: ResultHandle, value: u32 },
    /// The root result is now owned by `aggregation_task`.
    Delegated {
        root: ResultHandle,
        leaf_handles: Vec<ResultHandle>,
        leaf_tasks: Vec<TaskId>,
        aggregation_task: TaskId,
    },
}

impl Outcome {
    pub fn root(&self) -> &ResultHandle {
        match self {
            Outcome::Resolved { root, .. } | Outcome::Delegated { root, .. } => root,
        }
    }
}
