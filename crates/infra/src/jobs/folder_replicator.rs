//! Consumer half of replication over the shared events folder.

use std::sync::Arc;

use tracing::{debug, info, warn};

use profhub_core::Clock;
use profhub_events::CliWorkspaceEvent;

use super::handlers::EventDispatcher;
use super::FailurePolicy;
use crate::folder_queue::FolderQueue;
use crate::scheduler::{Job, JobContext, JobError, JobType, SchedulerTrigger};
use crate::workspace::WorkspaceResolver;

/// Reads CLI event files oldest-first and dispatches them.
///
/// - unparseable files stay in place (skipped by the folder queue);
/// - events for an unknown workspace stay in place until it is known;
/// - a dispatched event's file is moved to the archive.
///
/// Handler failures follow [`FailurePolicy`], `RetainForRetry` by default.
pub struct FolderEventsReplicatorJob {
    folder: Arc<FolderQueue>,
    resolver: Arc<dyn WorkspaceResolver>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    downstream: Option<Arc<dyn SchedulerTrigger>>,
    policy: FailurePolicy,
}

impl FolderEventsReplicatorJob {
    pub fn new(
        folder: Arc<FolderQueue>,
        resolver: Arc<dyn WorkspaceResolver>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            folder,
            resolver,
            dispatcher,
            clock,
            downstream: None,
            policy: FailurePolicy::RetainForRetry,
        }
    }

    pub fn with_downstream(mut self, trigger: Arc<dyn SchedulerTrigger>) -> Self {
        self.downstream = Some(trigger);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process every pending file once. Returns how many were archived.
    pub fn process_pending(&self) -> Result<usize, JobError> {
        let entries = self
            .folder
            .poll(|raw: &str| serde_json::from_str::<CliWorkspaceEvent>(raw))?;

        let mut processed = 0;
        for entry in entries {
            let event = entry.payload.clone().into_workspace_event(self.clock.now());

            if self.resolver.resolve(&event.workspace_id).is_none() {
                debug!(
                    file = %entry.file_name,
                    workspace_id = %event.workspace_id,
                    "workspace not known yet, leaving event file"
                );
                continue;
            }

            if let Err(err) = self.dispatcher.dispatch(&event) {
                match self.policy {
                    FailurePolicy::RetainForRetry => {
                        warn!(
                            file = %entry.file_name,
                            event_type = %event.event_type,
                            error = %err,
                            "failed to handle event file, will retry"
                        );
                        continue;
                    }
                    FailurePolicy::SkipAndAcknowledge => {
                        warn!(
                            file = %entry.file_name,
                            event_type = %event.event_type,
                            error = %err,
                            "failed to handle event file, skipping"
                        );
                    }
                }
            }

            match self.folder.acknowledge(&entry) {
                Ok(()) => processed += 1,
                Err(err) => warn!(file = %entry.file_name, error = %err, "failed to archive event file"),
            }
        }
        Ok(processed)
    }
}

impl Job for FolderEventsReplicatorJob {
    fn job_type(&self) -> JobType {
        JobType::FolderEventsReplicator
    }

    fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
        let processed = self.process_pending()?;
        if processed > 0 {
            info!(processed, "workspace event files replicated");
            if let Some(trigger) = &self.downstream {
                trigger.execute(None).detach();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryPlatformRepository, PlatformRepository};
    use crate::test_support::{at, CountingTrigger};
    use crate::workspace::{StaticWorkspaceResolver, WorkspaceInfo};
    use profhub_core::{FixedClock, InstanceId};

    struct Fixture {
        _dir: tempfile::TempDir,
        folder: Arc<FolderQueue>,
        resolver: Arc<StaticWorkspaceResolver>,
        repository: Arc<InMemoryPlatformRepository>,
        trigger: Arc<CountingTrigger>,
        job: FolderEventsReplicatorJob,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(at("2026-02-20T10:00:00Z")));
        let folder = Arc::new(FolderQueue::open(dir.path().join("events"), clock.clone()).unwrap());
        let resolver = Arc::new(StaticWorkspaceResolver::new());
        let repository = Arc::new(InMemoryPlatformRepository::new());
        let dispatcher = Arc::new(EventDispatcher::standard(repository.clone(), clock.clone()));
        let trigger = Arc::new(CountingTrigger::default());
        let job = FolderEventsReplicatorJob::new(folder.clone(), resolver.clone(), dispatcher, clock)
            .with_downstream(trigger.clone());
        Fixture {
            _dir: dir,
            folder,
            resolver,
            repository,
            trigger,
            job,
        }
    }

    fn cli_event(event_type: &str, origin_event_id: &str, content: &str) -> String {
        serde_json::json!({
            "originEventId": origin_event_id,
            "originProjectId": "origin-proj-001",
            "workspaceId": "ws-001",
            "eventType": event_type,
            "content": content,
            "originCreatedAt": "2026-02-20T09:59:00Z"
        })
        .to_string()
    }

    fn pending(f: &Fixture) -> usize {
        f.folder
            .poll(|raw: &str| serde_json::from_str::<serde_json::Value>(raw))
            .unwrap()
            .len()
    }

    #[test]
    fn unknown_workspace_leaves_file_until_registered() {
        let f = fixture();
        f.folder
            .publish(&cli_event(
                "PROJECT_CREATED",
                "origin-proj-001",
                r#"{"projectName":"Demo","repositoryType":"ASYNC_PROFILER"}"#,
            ))
            .unwrap();

        f.job.execute(JobContext::empty()).unwrap();
        assert_eq!(pending(&f), 1);
        assert_eq!(f.trigger.fired(), 0);

        f.resolver.register(WorkspaceInfo::local("ws-001"));
        f.job.execute(JobContext::empty()).unwrap();

        assert_eq!(pending(&f), 0);
        assert_eq!(f.repository.list_projects().unwrap().len(), 1);
        assert_eq!(f.trigger.fired(), 1);
    }

    #[test]
    fn failed_dispatch_is_retried_next_tick() {
        let f = fixture();
        f.resolver.register(WorkspaceInfo::local("ws-001"));
        f.folder
            .publish(&cli_event(
                "PROJECT_INSTANCE_CREATED",
                "inst-new-001",
                r#"{"relativeInstancePath":"inst-dir-001"}"#,
            ))
            .unwrap();

        f.job.execute(JobContext::empty()).unwrap();
        assert_eq!(pending(&f), 1);

        f.folder
            .publish(&cli_event(
                "PROJECT_CREATED",
                "origin-proj-001",
                r#"{"projectName":"Demo"}"#,
            ))
            .unwrap();
        // Both files share a timestamp, so their relative order is arbitrary.
        f.job.execute(JobContext::empty()).unwrap();
        f.job.execute(JobContext::empty()).unwrap();

        assert_eq!(pending(&f), 0);
        assert!(f
            .repository
            .find_instance(&InstanceId::new("inst-new-001"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn garbage_files_never_fail_the_tick() {
        let f = fixture();
        f.resolver.register(WorkspaceInfo::local("ws-001"));
        f.folder.publish("{ not json").unwrap();

        f.job.execute(JobContext::empty()).unwrap();

        assert_eq!(f.trigger.fired(), 0);
    }
}
