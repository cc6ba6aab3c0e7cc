//! Task Executor Module
//!
//! The worker side of the grid: a pool of workers that pull dispatchable tasks
//! from one partition and run the handler each task names.
//!
//! ## Architecture Overview
//! 1. **Polling**: Workers ask the grid for tasks of their partition whose
//!    dependencies are all resolved.
//! 2. **Claiming**: A worker claims a task by taking a lease on it; the grid
//!    hands back the invocation with payload and dependency bytes attached.
//! 3. **Execution**: The handler named in the task options runs, bounded by the
//!    task's `max_duration`, while a sidecar renews the lease.
//! 4. **Completion**: The outcome is reported back; the grid checks that the
//!    task wrote, or handed off, every output it owned.
//!
//! ## Submodules
//! - **`executor`**: Manages the worker pool and the execution lifecycle (claim -> run -> complete).
//! - **`registry`**: Resolves the handler name a task carries to an async closure.

pub mod executor;
pub mod registry;
