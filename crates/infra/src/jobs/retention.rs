//! Data retention: delete aged queue events, messages and alerts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use profhub_core::Clock;

use crate::folder_queue::{FolderQueue, FolderQueueError};
use crate::queue::{PersistentQueue, QueueError};
use crate::repository::{NoticeStore, RepositoryError};
use crate::scheduler::{Job, JobContext, JobError, JobType};

pub const DEFAULT_RETENTION_DAYS: i64 = 31;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Folder(#[from] FolderQueueError),
}

/// A store whose rows can be aged out.
pub trait RetentionTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Delete rows strictly older than `cutoff`; returns how many.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RetentionError>;
}

/// Queue events (dedup records are kept).
pub struct QueueEventsTarget(pub Arc<dyn PersistentQueue>);

impl RetentionTarget for QueueEventsTarget {
    fn name(&self) -> &str {
        "persistent_queue_events"
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RetentionError> {
        Ok(self.0.delete_older_than(cutoff)?)
    }
}

/// A message or alert store.
pub struct NoticesTarget {
    name: String,
    store: Arc<dyn NoticeStore>,
}

impl NoticesTarget {
    pub fn new(name: impl Into<String>, store: Arc<dyn NoticeStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl RetentionTarget for NoticesTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RetentionError> {
        Ok(self.store.delete_older_than(cutoff)?)
    }
}

/// Archived event files of the shared events folder.
impl RetentionTarget for FolderQueue {
    fn name(&self) -> &str {
        "processed_event_files"
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RetentionError> {
        Ok(self.cleanup_older_than(cutoff)?)
    }
}

/// Retention windows per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub queue_events: Duration,
    pub messages: Duration,
    pub alerts: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            queue_events: Duration::days(DEFAULT_RETENTION_DAYS),
            messages: Duration::days(DEFAULT_RETENTION_DAYS),
            alerts: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }
}

/// Rows deleted per target in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: BTreeMap<String, u64>,
    pub failed: Vec<String>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }
}

/// Applies each target's window independently. A failing target is logged
/// and does not prevent the others from running.
pub struct DataRetentionJob {
    targets: Vec<(Arc<dyn RetentionTarget>, Duration)>,
    clock: Arc<dyn Clock>,
}

impl DataRetentionJob {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            targets: Vec::new(),
            clock,
        }
    }

    /// Queue events, messages and alerts with the policy's windows.
    pub fn standard(
        queue: Arc<dyn PersistentQueue>,
        messages: Arc<dyn NoticeStore>,
        alerts: Arc<dyn NoticeStore>,
        policy: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(clock)
            .with_target(Arc::new(QueueEventsTarget(queue)), policy.queue_events)
            .with_target(Arc::new(NoticesTarget::new("messages", messages)), policy.messages)
            .with_target(Arc::new(NoticesTarget::new("alerts", alerts)), policy.alerts)
    }

    pub fn with_target(mut self, target: Arc<dyn RetentionTarget>, retention: Duration) -> Self {
        self.targets.push((target, retention));
        self
    }

    pub fn run(&self) -> RetentionReport {
        let now = self.clock.now();
        let mut report = RetentionReport::default();

        for (target, retention) in &self.targets {
            let cutoff = now - *retention;
            match target.delete_older_than(cutoff) {
                Ok(deleted) => {
                    debug!(target = target.name(), %cutoff, deleted, "retention applied");
                    report.deleted.insert(target.name().to_string(), deleted);
                }
                Err(err) => {
                    warn!(target = target.name(), error = %err, "retention failed for target");
                    report.failed.push(target.name().to_string());
                }
            }
        }
        report
    }
}

impl Job for DataRetentionJob {
    fn job_type(&self) -> JobType {
        JobType::DataRetention
    }

    fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
        let report = self.run();
        if report.total_deleted() > 0 {
            info!(deleted = report.total_deleted(), "aged data deleted");
        }
        Ok(())
    }
}
