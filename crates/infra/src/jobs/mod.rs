//! Scheduled jobs built on the queue, the folder queue and the platform store.

pub mod folder_replicator;
pub mod handlers;
pub mod replicator;
pub mod retention;
pub mod session_finish;
pub mod synchronizer;

pub use folder_replicator::FolderEventsReplicatorJob;
pub use handlers::{
    DispatchOutcome, EventDispatcher, HandlerError, InstanceCreatedHandler, ProjectCreatedHandler,
    SessionCreatedHandler, WorkspaceEventHandler,
};
pub use replicator::{ReplicationError, WorkspaceEventsReplicatorJob};
pub use retention::{
    DataRetentionJob, NoticesTarget, QueueEventsTarget, RetentionError, RetentionPolicy,
    RetentionReport, RetentionTarget,
};
pub use session_finish::{
    DetectionReport, FinishError, HeartbeatSessionFinisher, SessionFinishedDetectorJob,
    SessionFinisher,
};
pub use synchronizer::{ProjectsSynchronizerJob, SyncReport};

use serde::{Deserialize, Serialize};

/// What a consumer does with an entry whose handler failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Log and move on; the entry is acknowledged with the rest of the batch
    /// and never retried.
    SkipAndAcknowledge,
    /// Leave the entry (and, for a cursor, everything after it) unacknowledged
    /// so the next tick retries it.
    RetainForRetry,
}
