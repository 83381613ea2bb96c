//! Periodic job scheduling.
//!
//! ## Components
//!
//! - `Job`: synchronous unit of work executed once per tick
//! - `JobContext` / `JobDescriptor`: inert data passed into an execution
//! - `Scheduler`: registers jobs with a period and runs them on tokio
//! - `SchedulerTrigger` / `TriggerHandle`: lets one job fire another
//!
//! A job never reaches a terminal failure state: an error from one
//! execution is logged and the job runs again at its next period.

pub mod definitions;
pub mod job;
pub mod runner;
pub mod trigger;

pub use definitions::{JobDefinitionError, JobDefinitions, JobDescriptor};
pub use job::{Job, JobContext, JobError, JobType};
pub use runner::{JobStats, ScheduleConfig, Scheduler, SchedulerHandle};
pub use trigger::{JobTrigger, SchedulerTrigger, TriggerError, TriggerHandle};
