//! # Task Management System
//!
//! A small worker pool for chunk generation and meshing.
//!
//! ## Architecture Overview
//! - `TaskManager`: distributes tasks to workers round-robin and collects results
//! - `Task`: a unit of work executed off the main thread
//! - `TaskResult`: the result of a task, applied on the main thread
//! - `TaskChannel`: the pair of channels connecting the main thread to one worker
//!
//! Each worker accepts at most `MAX_TASKS_IN_FLIGHT` tasks; anything beyond
//! that waits in a FIFO queue until a worker frees up. A manager created with
//! zero workers runs every task inline when queued tasks are processed, which
//! keeps single-threaded targets and tests deterministic.
//!
//! ## Usage
//! Once per frame:
//! 1. `process_completed_tasks(&mut store)` to apply finished work
//! 2. `process_queued_tasks()` to hand waiting tasks to idle workers

pub mod task;

use log::{error, info, warn};
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use task::{Task, TaskResult};

use crate::engine_state::voxels::chunk_manager::ChunkStore;

/// A communication channel between the main thread and one worker thread.
#[derive(Debug)]
pub struct TaskChannel {
    task_sender: Sender<Box<dyn Task>>,
    result_receiver: Receiver<Box<dyn TaskResult>>,
    num_tasks_in_flight: usize,
    _worker: JoinHandle<()>,
}

/// Starts one worker thread and returns the channels to it.
fn spawn_worker(worker_index: usize) -> io::Result<TaskChannel> {
    let (task_tx, task_rx) = channel::<Box<dyn Task>>();
    let (result_tx, result_rx) = channel::<Box<dyn TaskResult>>();

    let worker = thread::Builder::new()
        .name(format!("chunk-worker-{worker_index}"))
        .spawn(move || {
            while let Ok(task) = task_rx.recv() {
                let result = task.process();
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        })?;

    Ok(TaskChannel {
        task_sender: task_tx,
        result_receiver: result_rx,
        num_tasks_in_flight: 0,
        _worker: worker,
    })
}

/// Manages a pool of worker threads and coordinates task execution.
///
/// Dropping the manager closes every task channel, which ends the worker
/// loops once their current task completes.
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    queued_tasks: VecDeque<Box<dyn Task>>,
    inline_results: VecDeque<Box<dyn TaskResult>>,
    current_channel: usize,
}

/// Maximum number of tasks that can be in flight per worker channel.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

impl TaskManager {
    /// Creates a new `TaskManager` with the specified number of worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of worker threads to spawn. Zero selects inline
    ///   execution on the calling thread.
    ///
    /// If the operating system refuses a thread, the pool keeps the workers
    /// spawned so far; with none it runs inline.
    pub fn new(num_workers: usize) -> Self {
        Self::with_spawner(num_workers, spawn_worker)
    }

    fn with_spawner<F>(num_workers: usize, mut spawn: F) -> Self
    where
        F: FnMut(usize) -> io::Result<TaskChannel>,
    {
        let mut channels = Vec::with_capacity(num_workers);

        for worker_index in 0..num_workers {
            match spawn(worker_index) {
                Ok(channel) => channels.push(channel),
                Err(err) => {
                    warn!("Could not spawn chunk worker {}: {}", worker_index, err);
                    break;
                }
            }
        }

        if channels.is_empty() {
            info!("Task manager running tasks inline");
        } else {
            info!(
                "Task manager started {} workers (available parallelism: {:?})",
                channels.len(),
                thread::available_parallelism()
            );
        }

        TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            inline_results: VecDeque::new(),
            current_channel: 0,
        }
    }

    /// Number of worker threads. Zero means inline execution.
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    /// Attempts to send a task to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the worker accepted the task
    /// - `Err(task)` if the worker has gone away, handing the task back
    fn try_send_task(&mut self, task: Box<dyn Task>, channel_idx: usize) -> Result<(), Box<dyn Task>> {
        match self.channels[channel_idx].task_sender.send(task) {
            Ok(_) => {
                self.channels[channel_idx].num_tasks_in_flight += 1;
                Ok(())
            }
            Err(returned) => Err(returned.0),
        }
    }

    /// Finds a worker with spare capacity, round-robin from the last used one.
    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }

        let start = self.current_channel % self.channels.len();
        let mut current = start;
        loop {
            if self.channels[current].num_tasks_in_flight < MAX_TASKS_IN_FLIGHT {
                return Some(current);
            }
            current = (current + 1) % self.channels.len();
            if current == start {
                return None;
            }
        }
    }

    /// Publishes a new task for execution.
    ///
    /// # Returns
    /// - `true` if the task was handed straight to a worker
    /// - `false` if it was queued (all workers busy, or inline mode)
    pub fn publish_task(&mut self, task: Box<dyn Task>) -> bool {
        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(task, channel_idx) {
                Ok(_) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(task) => {
                    error!("Chunk worker {} disconnected, queueing task", channel_idx);
                    self.queued_tasks.push_back(task);
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(task);
                false
            }
        }
    }

    /// Hands queued tasks to idle workers, oldest first.
    ///
    /// In inline mode every queued task is processed right here and its
    /// result is held until the next `process_completed_tasks` call.
    pub fn process_queued_tasks(&mut self) {
        if self.channels.is_empty() {
            while let Some(task) = self.queued_tasks.pop_front() {
                self.inline_results.push_back(task.process());
            }
            return;
        }

        while let Some(channel_idx) = self.find_available_channel() {
            let Some(task) = self.queued_tasks.pop_front() else {
                break;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(_) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(task) => {
                    self.queued_tasks.push_front(task);
                    break;
                }
            }
        }
    }

    /// Applies every finished result to the store without blocking.
    ///
    /// Follow-up tasks produced by results are published immediately.
    pub fn process_completed_tasks(&mut self, store: &mut ChunkStore) {
        let mut tasks_to_publish = Vec::new();

        while let Some(result) = self.inline_results.pop_front() {
            tasks_to_publish.extend(result.handle_result(store));
        }

        for channel in &mut self.channels {
            while let Ok(result) = channel.result_receiver.try_recv() {
                channel.num_tasks_in_flight -= 1;
                tasks_to_publish.extend(result.handle_result(store));
            }
        }

        for task in tasks_to_publish {
            self.publish_task(task);
        }
    }

    /// Whether no task is queued, running, or waiting to be handled.
    pub fn is_idle(&self) -> bool {
        self.queued_tasks.is_empty()
            && self.inline_results.is_empty()
            && self.channels.iter().all(|c| c.num_tasks_in_flight == 0)
    }

    /// Runs until every task, including follow-ups, has completed and been
    /// applied. Blocks on worker results.
    pub fn flush(&mut self, store: &mut ChunkStore) {
        loop {
            self.process_queued_tasks();
            self.process_completed_tasks(store);
            if self.is_idle() {
                return;
            }

            let mut follow_ups = Vec::new();
            if let Some(channel) = self.channels.iter_mut().find(|c| c.num_tasks_in_flight > 0) {
                match channel.result_receiver.recv() {
                    Ok(result) => {
                        channel.num_tasks_in_flight -= 1;
                        follow_ups = result.handle_result(store);
                    }
                    Err(_) => {
                        error!("Chunk worker exited with {} tasks in flight", channel.num_tasks_in_flight);
                        channel.num_tasks_in_flight = 0;
                    }
                }
            }
            for task in follow_ups {
                self.publish_task(task);
            }
        }
    }

    /// Discards every queued task and every unhandled inline result.
    /// Tasks already running on workers still complete.
    pub fn clear_queue(&mut self) {
        self.queued_tasks.clear();
        self.inline_results.clear();
    }
}
