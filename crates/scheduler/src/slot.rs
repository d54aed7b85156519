//! Single-flight task slot
//!
//! A [`TaskSlot`] owns at most one [`RenderTask`]. Starting a new task first
//! cancels the current one and blocks until it has settled, so two tasks
//! owned by the same slot never run concurrently.

use crate::cancel::CancellationToken;
use crate::task::{RenderTask, TaskOutcome};
use log::debug;
use std::io;

pub struct TaskSlot<T, E> {
    name: String,
    current: Option<RenderTask<T, E>>,
    generation: u64,
}

impl<T, E> TaskSlot<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create an empty slot. Worker threads are named after `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), current: None, generation: 0 }
    }

    /// Cancel and settle the current task, then start `work`.
    ///
    /// Returns the generation number of the new task.
    pub fn replace<F>(&mut self, work: F) -> io::Result<u64>
    where
        F: FnOnce(&CancellationToken) -> Result<T, E> + Send + 'static,
    {
        self.cancel();

        self.generation += 1;
        let thread_name = format!("{}-{}", self.name, self.generation);
        self.current = Some(RenderTask::spawn(&thread_name, work)?);

        debug!("{}: started generation {}", self.name, self.generation);
        Ok(self.generation)
    }

    /// Cancel the current task and wait for it to settle.
    ///
    /// Returns `true` if a task was in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(task) = self.current.take() else {
            return false;
        };

        task.cancel();
        let outcome = task.wait();
        debug!(
            "{}: generation {} settled after cancel (cancelled={})",
            self.name,
            self.generation,
            outcome.is_cancelled()
        );
        true
    }

    /// Wait for the current task, leaving the slot empty.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn wait(&mut self) -> Option<TaskOutcome<T, E>> {
        self.current.take().map(RenderTask::wait)
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Generation number of the most recently started task.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T, E> Drop for TaskSlot<T, E> {
    fn drop(&mut self) {
        if let Some(task) = self.current.take() {
            task.cancel();
        }
    }
}
