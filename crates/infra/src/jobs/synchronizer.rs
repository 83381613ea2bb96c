//! Workspace-scoped queue consumer that materializes entities.

use std::sync::Arc;

use tracing::{debug, info, warn};

use profhub_core::WorkspaceId;

use super::handlers::{DispatchOutcome, EventDispatcher};
use super::FailurePolicy;
use crate::queue::{ConsumerId, Offset, PersistentQueue, QueueError, Topic};
use crate::scheduler::{Job, JobContext, JobError, JobType};
use crate::workspace::WorkspaceResolver;

/// Outcome of draining one workspace topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub polled: usize,
    pub handled: usize,
    pub ignored: usize,
    pub failed: usize,
    pub acknowledged: Option<Offset>,
}

/// Drains each workspace's queue with the `SYNCHRONIZER` consumer, in
/// ascending offset order, dispatching every entry individually.
///
/// A failing entry never prevents later entries from being handled. What
/// happens to the cursor is governed by [`FailurePolicy`]: by default the
/// whole polled batch is acknowledged, so a failed entry is dropped.
pub struct ProjectsSynchronizerJob {
    queue: Arc<dyn PersistentQueue>,
    resolver: Arc<dyn WorkspaceResolver>,
    dispatcher: Arc<EventDispatcher>,
    consumer: ConsumerId,
    policy: FailurePolicy,
}

impl ProjectsSynchronizerJob {
    pub fn new(
        queue: Arc<dyn PersistentQueue>,
        resolver: Arc<dyn WorkspaceResolver>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            queue,
            resolver,
            dispatcher,
            consumer: ConsumerId::synchronizer(),
            policy: FailurePolicy::SkipAndAcknowledge,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerId) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn synchronize_workspace(&self, workspace_id: &WorkspaceId) -> Result<SyncReport, QueueError> {
        let topic = Topic::for_workspace(workspace_id);
        let mut entries = self.queue.poll(&topic, &self.consumer)?;
        if entries.is_empty() {
            return Ok(SyncReport::default());
        }
        entries.sort_by_key(|e| e.offset);

        let mut report = SyncReport {
            polled: entries.len(),
            ..SyncReport::default()
        };

        for entry in &entries {
            let event = &entry.payload;
            match self.dispatcher.dispatch(event) {
                Ok(DispatchOutcome::Handled) => {
                    report.handled += 1;
                    report.acknowledged = Some(entry.offset);
                }
                Ok(DispatchOutcome::Ignored) => {
                    report.ignored += 1;
                    report.acknowledged = Some(entry.offset);
                }
                Err(err) => {
                    report.failed += 1;
                    match self.policy {
                        FailurePolicy::SkipAndAcknowledge => {
                            warn!(
                                workspace_id = %workspace_id,
                                offset = entry.offset,
                                event_type = %event.event_type,
                                origin_event_id = %event.origin_event_id,
                                error = %err,
                                "failed to handle event, skipping"
                            );
                            report.acknowledged = Some(entry.offset);
                        }
                        FailurePolicy::RetainForRetry => {
                            warn!(
                                workspace_id = %workspace_id,
                                offset = entry.offset,
                                event_type = %event.event_type,
                                origin_event_id = %event.origin_event_id,
                                error = %err,
                                "failed to handle event, will retry"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if let Some(upto) = report.acknowledged {
            self.queue.acknowledge(&topic, &self.consumer, upto)?;
        }
        debug!(workspace_id = %workspace_id, ?report, "workspace synchronized");
        Ok(report)
    }
}

impl Job for ProjectsSynchronizerJob {
    fn job_type(&self) -> JobType {
        JobType::ProjectsSynchronizer
    }

    fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
        let mut first_error = None;
        for workspace_id in self.resolver.list_workspace_ids() {
            match self.synchronize_workspace(&workspace_id) {
                Ok(report) if report.polled > 0 => info!(
                    workspace_id = %workspace_id,
                    handled = report.handled,
                    failed = report.failed,
                    "workspace events synchronized"
                ),
                Ok(_) => {}
                Err(err) => {
                    warn!(workspace_id = %workspace_id, error = %err, "queue failure while synchronizing workspace");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryPersistentQueue;
    use crate::repository::{InMemoryPlatformRepository, PlatformRepository};
    use crate::test_support::{at, instance_created, project_created, session_created};
    use crate::workspace::{StaticWorkspaceResolver, WorkspaceInfo};
    use profhub_core::{FixedClock, InstanceId};

    struct Fixture {
        queue: Arc<InMemoryPersistentQueue>,
        repository: Arc<InMemoryPlatformRepository>,
        job: ProjectsSynchronizerJob,
    }

    fn fixture(policy: FailurePolicy) -> Fixture {
        let queue = Arc::new(InMemoryPersistentQueue::new());
        let repository = Arc::new(InMemoryPlatformRepository::new());
        let clock = Arc::new(FixedClock::new(at("2025-06-15T12:00:00Z")));
        let resolver = Arc::new(StaticWorkspaceResolver::with_workspaces([WorkspaceInfo::local(
            "ws-001",
        )]));
        let dispatcher = Arc::new(EventDispatcher::standard(repository.clone(), clock));
        let job = ProjectsSynchronizerJob::new(queue.clone(), resolver, dispatcher).with_policy(policy);
        Fixture {
            queue,
            repository,
            job,
        }
    }

    fn topic() -> Topic {
        Topic::new("ws-001")
    }

    #[test]
    fn materializes_entities_in_offset_order() {
        let f = fixture(FailurePolicy::SkipAndAcknowledge);
        for event in [
            project_created("ws-001", "p-1"),
            instance_created("ws-001", "p-1", "i-1"),
            session_created("ws-001", "p-1", "i-1", "s-1"),
        ] {
            f.queue.append(&topic(), event).unwrap();
        }

        f.job.execute(JobContext::empty()).unwrap();

        let instance = f
            .repository
            .find_instance(&InstanceId::new("i-1"))
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, crate::repository::InstanceStatus::Active);
        assert!(f.queue.poll(&topic(), &ConsumerId::synchronizer()).unwrap().is_empty());
    }

    #[test]
    fn failed_entry_is_skipped_and_batch_acknowledged() {
        let f = fixture(FailurePolicy::SkipAndAcknowledge);
        // Instance of a project that does not exist yet fails.
        f.queue
            .append(&topic(), instance_created("ws-001", "ghost", "i-1"))
            .unwrap();
        f.queue.append(&topic(), project_created("ws-001", "p-1")).unwrap();

        f.job.execute(JobContext::empty()).unwrap();

        assert_eq!(f.repository.list_projects().unwrap().len(), 1);
        assert!(f.queue.poll(&topic(), &ConsumerId::synchronizer()).unwrap().is_empty());
    }

    #[test]
    fn retain_policy_stops_before_first_failure() {
        let f = fixture(FailurePolicy::RetainForRetry);
        f.queue.append(&topic(), project_created("ws-001", "p-1")).unwrap();
        f.queue
            .append(&topic(), instance_created("ws-001", "ghost", "i-1"))
            .unwrap();
        f.queue.append(&topic(), project_created("ws-001", "p-2")).unwrap();

        let report = f.job.synchronize_workspace(&WorkspaceId::new("ws-001")).unwrap();

        assert_eq!(report.handled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.acknowledged, Some(1));
        let remaining = f.queue.poll(&topic(), &ConsumerId::synchronizer()).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn empty_topic_acknowledges_nothing() {
        let f = fixture(FailurePolicy::SkipAndAcknowledge);
        let report = f.job.synchronize_workspace(&WorkspaceId::new("ws-001")).unwrap();
        assert_eq!(report, SyncReport::default());
    }
}
