//! Fork-Join Subtasking Library
//!
//! Worker-side recursive decomposition for a distributed task grid: a task
//! too large to run in one step fans out into leaf tasks plus an aggregation
//! task that the grid only dispatches once every leaf result exists.
//!
//! ## Architecture Modules
//! - **`grid`**: The collaborator interfaces (result registry, task queue) and an
//!   in-memory grid with dependency-gated dispatch and leases.
//! - **`decomposition`**: The partitioner, the aggregator and the engine that
//!   decides, per invocation, between splitting and resolving.
//! - **`executor`**: The worker pool and the handler registry.
//! - **`config`**: Command-line configuration of a node.

pub mod config;
pub mod decomposition;
pub mod executor;
pub mod grid;
