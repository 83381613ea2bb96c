use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use profhub_core::JobRunId;

use super::definitions::JobDescriptor;
use crate::folder_queue::FolderQueueError;
use crate::queue::QueueError;
use crate::repository::RepositoryError;

/// Kind of schedulable job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Drains workspace queues into the platform store.
    ProjectsSynchronizer,
    /// Sweeps remote sources and appends deduplicated events.
    WorkspaceEventsReplicator,
    /// Consumes CLI event files from the shared events folder.
    FolderEventsReplicator,
    /// Finishes sessions and instances from heartbeat/crash signals.
    SessionFinishedDetector,
    /// Deletes aged queue events, messages and alerts.
    DataRetention,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProjectsSynchronizer => "PROJECTS_SYNCHRONIZER",
            JobType::WorkspaceEventsReplicator => "WORKSPACE_EVENTS_REPLICATOR",
            JobType::FolderEventsReplicator => "FOLDER_EVENTS_REPLICATOR",
            JobType::SessionFinishedDetector => "SESSION_FINISHED_DETECTOR",
            JobType::DataRetention => "DATA_RETENTION",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobContext {
    /// Absent for direct invocations outside the scheduler.
    pub run_id: Option<JobRunId>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub descriptor: Option<JobDescriptor>,
}

impl JobContext {
    /// Context for a direct call (tests, manual runs).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn scheduled(at: DateTime<Utc>) -> Self {
        Self {
            run_id: Some(JobRunId::new()),
            scheduled_at: Some(at),
            descriptor: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: Option<JobDescriptor>) -> Self {
        self.descriptor = descriptor;
        self
    }
}

/// Error escaping a job execution.
///
/// Jobs isolate per-item failures internally; what reaches the scheduler is
/// typically a storage failure the job chose not to swallow.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    FolderQueue(#[from] FolderQueueError),

    #[error("job failed: {0}")]
    Failed(String),
}

/// A unit of periodic work.
///
/// `execute` is synchronous and runs on the blocking pool. The scheduler
/// never runs two executions of the same registered job concurrently.
pub trait Job: Send + Sync + 'static {
    fn job_type(&self) -> JobType;

    fn execute(&self, ctx: JobContext) -> Result<(), JobError>;
}

impl<J> Job for Arc<J>
where
    J: Job + ?Sized,
{
    fn job_type(&self) -> JobType {
        (**self).job_type()
    }

    fn execute(&self, ctx: JobContext) -> Result<(), JobError> {
        (**self).execute(ctx)
    }
}
