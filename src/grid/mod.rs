//! Task Grid Module
//!
//! Models the external scheduler and result store that worker handlers run on.
//!
//! ## Architecture Overview
//! The grid follows a **Pull-based** model with **Lease** management and
//! **dependency-gated dispatch**:
//! 1. **Registration**: Result placeholders are minted before any task that
//!    produces or consumes them exists. Payloads are uploaded as results with data.
//! 2. **Submission**: Tasks name a payload, the results they must write and the
//!    results they depend on. Each task in a batch is validated on its own.
//! 3. **Dispatch**: A task becomes visible to workers only once every data
//!    dependency is resolved. Its invocation carries the dependency bytes.
//! 4. **Leasing**: A worker claims a task by taking a lease. If the worker dies,
//!    the lease expires and the task is handed out again, up to `max_retries` times.
//!
//! ## Submodules
//! - **`client`**: The traits a worker sees (`ResultRegistry`, `TaskQueue`).
//! - **`memory`**: A single-process grid implementing both traits plus the scheduler side.
//! - **`types`**: Handles, descriptors, options and statuses.

pub mod client;
pub mod memory;
pub mod types;

#[cfg(test)]
mod tests;
