//! Background render tasks
//!
//! A [`RenderTask`] runs one unit of work on its own thread. The owner can
//! cancel it at any time; a cancelled task always settles as
//! [`TaskOutcome::Cancelled`], whatever the worker returned.

use crate::cancel::CancellationToken;
use std::io;
use std::thread::{self, JoinHandle};

/// How a task settled.
#[derive(Debug)]
pub enum TaskOutcome<T, E> {
    /// The work finished and was not cancelled.
    Completed(T),
    /// The owner cancelled the task; any result was discarded.
    Cancelled,
    /// The work returned an error.
    Failed(E),
    /// The worker thread panicked.
    Panicked(String),
}

impl<T, E> TaskOutcome<T, E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Handle to work running on a background thread.
///
/// Dropping the handle without calling [`wait`](Self::wait) cancels the task
/// and detaches the thread.
pub struct RenderTask<T, E> {
    token: CancellationToken,
    thread: Option<JoinHandle<Result<T, E>>>,
}

impl<T, E> RenderTask<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Start `work` on a new thread named `name`.
    ///
    /// The closure receives the task's token and should consult it at
    /// natural checkpoints.
    pub fn spawn<F>(name: &str, work: F) -> io::Result<Self>
    where
        F: FnOnce(&CancellationToken) -> Result<T, E> + Send + 'static,
    {
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || work(&worker_token))?;

        Ok(Self { token, thread: Some(thread) })
    }
}

impl<T, E> RenderTask<T, E> {
    /// Signal cancellation. Does not block.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` once the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the worker returns and report how the task settled.
    pub fn wait(mut self) -> TaskOutcome<T, E> {
        let Some(thread) = self.thread.take() else {
            return TaskOutcome::Cancelled;
        };

        let joined = thread.join();

        if self.token.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        match joined {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(err)) => TaskOutcome::Failed(err),
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }
}

impl<T, E> Drop for RenderTask<T, E> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "render worker panicked".to_owned()
    }
}
