//! Pagemark Scheduler Library
//!
//! Cooperative cancellation and single-flight background tasks for page
//! rendering.
//!
//! # Example
//!
//! ```
//! use pagemark_scheduler::{TaskOutcome, TaskSlot};
//!
//! let mut slot: TaskSlot<u32, String> = TaskSlot::new("page-render");
//!
//! // Starting a second task cancels the first and waits for it to settle.
//! slot.replace(|_token| Ok(1)).unwrap();
//! slot.replace(|_token| Ok(2)).unwrap();
//!
//! assert!(matches!(slot.wait(), Some(TaskOutcome::Completed(2))));
//! ```

mod cancel;
mod slot;
mod task;

pub use cancel::{CancellationToken, Cancelled};
pub use slot::TaskSlot;
pub use task::{RenderTask, TaskOutcome};
