//! Scheduled post creation.
//!
//! ```text
//! POST /post/schedule ─► workflow::submit ─► TaskScheduler::schedule ─► scheduled_tasks
//!                                                                           │
//! Worker::run ─► TaskQueue::claim_due ─► worker::materialize ─► posts ◄─────┘
//! ```
//!
//! There is no retry: a failed task stays `failed` with its error text.

pub mod queue;
pub mod worker;
pub mod workflow;

pub use queue::{QueueError, SqliteTaskQueue, Task, TaskId, TaskQueue, TaskScheduler, TaskStatus};
pub use worker::{materialize, MaterializeError, Worker};
pub use workflow::{submit, EncodedImage, ScheduleError, ScheduledPostPayload};
