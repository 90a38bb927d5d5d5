//! Objectives: standing instructions that periodically (schedule) or in
//! response to an event produce [`crate::domain::Task`]s for the agent
//! loop to execute.

mod scheduler;
mod worker;

pub use scheduler::{ObjectiveScheduler, SchedulerHandle};
pub use worker::{TaskWorker, TaskWorkerHandle};
