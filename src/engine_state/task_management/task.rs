//! # Task System Core Traits
//!
//! This module defines the building blocks of the task system used to move
//! chunk generation and meshing off the simulation thread.
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and scheduled via `TaskManager::publish_task()`
//! 2. The task's `process()` method runs on a worker thread, consuming the task
//! 3. The task returns a boxed `TaskResult`
//! 4. The result's `handle_result()` runs on the main thread against the chunk store
//! 5. The result may publish follow-up tasks
//!
//! ## Ownership
//! `process` takes `self: Box<Self>`, so any buffer a task carries is moved
//! onto the worker and moved back inside the result. Nothing is shared
//! between threads while a task is in flight.

use crate::engine_state::voxels::chunk_manager::ChunkStore;

/// A unit of work that can be executed on a worker thread.
///
/// Tasks must own all the data they need. They should be coarse grained,
/// since each one costs a channel round trip.
pub trait Task: Send {
    /// Performs the work and returns a result for the main thread.
    ///
    /// Runs on a background thread when workers are available, or inline on
    /// the caller's thread when the manager has no workers.
    fn process(self: Box<Self>) -> Box<dyn TaskResult>;
}

/// The outcome of a processed `Task`, applied on the main thread.
///
/// Handling must be cheap: it runs inside the frame.
pub trait TaskResult: Send {
    /// Applies the result to the chunk store.
    ///
    /// # Returns
    /// Follow-up tasks to publish (can be empty).
    fn handle_result(self: Box<Self>, store: &mut ChunkStore) -> Vec<Box<dyn Task>>;
}
