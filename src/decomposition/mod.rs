//! Fork-Join Decomposition Module
//!
//! Splits a work unit that is too large for one task into leaf tasks plus one
//! aggregation task, across independent task invocations that share nothing
//! but the grid.
//!
//! ## How one decomposition unfolds
//! 1. A client registers the root result R and submits the root task expecting R.
//! 2. The root invocation sees `size > threshold`: it registers one result per
//!    partition, submits one leaf task per partition, and submits an aggregation
//!    task that expects R and depends on every leaf result.
//! 3. Leaves run in any order. Each holds at most `threshold` values and
//!    resolves its own result directly.
//! 4. Once every leaf result is resolved the grid dispatches the aggregation task,
//!    which combines the dependency values and writes R.
//!
//! ## Submodules
//! - **`partitioner`**: Pure computation of contiguous sub-ranges.
//! - **`aggregator`**: The wrapping `u32` sum and its 4-byte encoding.
//! - **`engine`**: The per-invocation state machine.
//! - **`client`**: Submission of the root task.

pub mod aggregator;
pub mod client;
pub mod engine;
pub mod error;
pub mod partitioner;
pub mod types;
