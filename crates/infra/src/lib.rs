//! Infrastructure layer: persistent queue, folder queue, platform store,
//! scheduler and the jobs that move workspace events between them.

pub mod config;
pub mod folder_queue;
pub mod jobs;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod scheduler;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;


pub use config::{ConfigError, JobPeriods, PlatformConfig};
pub use folder_queue::{FolderEntry, FolderQueue, FolderQueueError};
pub use queue::{
    ConsumerId, InMemoryPersistentQueue, Offset, PersistentQueue, PostgresPersistentQueue,
    QueueEntry, QueueError, QueueInspection, Topic,
};
pub use scheduler::{Job, JobType, Scheduler, SchedulerHandle, SchedulerTrigger};
pub use workspace::{StaticWorkspaceResolver, WorkspaceInfo, WorkspaceLocation, WorkspaceResolver};
