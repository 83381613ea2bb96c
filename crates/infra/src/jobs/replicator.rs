//! Producer half of replication: sweep remote entities into workspace queues.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use profhub_core::{Clock, WorkspaceId};
use profhub_events::{
    EventError, EventProducer, InstanceCreatedContent, ProjectCreatedContent,
    SessionCreatedContent, WorkspaceEvent, WorkspaceEventType,
};

use crate::queue::{PersistentQueue, QueueError, Topic};
use crate::remote::{RemoteEntitySource, RemoteError, RemoteInstance, RemoteProject, RemoteSession};
use crate::scheduler::{Job, JobContext, JobError, JobType, SchedulerTrigger};
use crate::workspace::{WorkspaceLocation, WorkspaceResolver};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Content(#[from] EventError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Sweeps every remote workspace and appends one event per entity.
///
/// Events are deduplicated by origin identity, so re-sweeping unchanged
/// remote state appends nothing. The downstream trigger fires at most once
/// per execution, and only when something was appended.
pub struct WorkspaceEventsReplicatorJob {
    remote: Arc<dyn RemoteEntitySource>,
    resolver: Arc<dyn WorkspaceResolver>,
    queue: Arc<dyn PersistentQueue>,
    clock: Arc<dyn Clock>,
    downstream: Option<Arc<dyn SchedulerTrigger>>,
}

impl WorkspaceEventsReplicatorJob {
    pub fn new(
        remote: Arc<dyn RemoteEntitySource>,
        resolver: Arc<dyn WorkspaceResolver>,
        queue: Arc<dyn PersistentQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            resolver,
            queue,
            clock,
            downstream: None,
        }
    }

    /// Job to fire after a sweep that appended at least one event.
    pub fn with_downstream(mut self, trigger: Arc<dyn SchedulerTrigger>) -> Self {
        self.downstream = Some(trigger);
        self
    }

    /// Replicate one workspace. Returns how many new events were appended.
    pub fn replicate_workspace(&self, workspace_id: &WorkspaceId) -> Result<usize, ReplicationError> {
        let events = self.collect_events(workspace_id)?;
        if events.is_empty() {
            return Ok(0);
        }
        let topic = Topic::for_workspace(workspace_id);
        let appended = self
            .queue
            .append_batch(&topic, events, &|event| event.dedup_key())?;
        Ok(appended)
    }

    /// Projects, each followed by its instances and then its sessions, so
    /// that parents always precede children in offset order.
    fn collect_events(&self, workspace_id: &WorkspaceId) -> Result<Vec<WorkspaceEvent>, ReplicationError> {
        let mut events = Vec::new();
        for project in self.remote.list_projects(workspace_id)? {
            let instances = self
                .remote
                .list_instances(workspace_id, &project.origin_project_id)?;
            let sessions = self
                .remote
                .list_sessions(workspace_id, &project.origin_project_id)?;

            events.push(self.project_event(workspace_id, &project)?);
            for instance in &instances {
                events.push(self.instance_event(workspace_id, instance)?);
            }
            for session in &sessions {
                events.push(self.session_event(workspace_id, session)?);
            }
        }
        Ok(events)
    }

    fn project_event(
        &self,
        workspace_id: &WorkspaceId,
        project: &RemoteProject,
    ) -> Result<WorkspaceEvent, EventError> {
        WorkspaceEvent::with_content(
            project.origin_project_id.clone(),
            project.origin_project_id.clone(),
            workspace_id.clone(),
            WorkspaceEventType::ProjectCreated,
            &ProjectCreatedContent {
                project_name: project.name.clone(),
                project_label: project.label.clone(),
                repository_type: project.repository_type,
                attributes: project.attributes.clone(),
            },
            project.created_at,
            self.clock.now(),
            EventProducer::WorkspaceEventsReplicator,
        )
    }

    fn instance_event(
        &self,
        workspace_id: &WorkspaceId,
        instance: &RemoteInstance,
    ) -> Result<WorkspaceEvent, EventError> {
        WorkspaceEvent::with_content(
            instance.instance_id.clone(),
            instance.origin_project_id.clone(),
            workspace_id.clone(),
            WorkspaceEventType::ProjectInstanceCreated,
            &InstanceCreatedContent {
                relative_instance_path: instance.relative_path.clone(),
            },
            instance.created_at,
            self.clock.now(),
            EventProducer::WorkspaceEventsReplicator,
        )
    }

    fn session_event(
        &self,
        workspace_id: &WorkspaceId,
        session: &RemoteSession,
    ) -> Result<WorkspaceEvent, EventError> {
        WorkspaceEvent::with_content(
            session.session_id.clone(),
            session.origin_project_id.clone(),
            workspace_id.clone(),
            WorkspaceEventType::ProjectInstanceSessionCreated,
            &SessionCreatedContent {
                instance_id: session.instance_id.clone(),
                order: session.order,
                relative_session_path: session.relative_path.clone(),
                profiler_settings: session.profiler_settings.clone(),
            },
            session.created_at,
            self.clock.now(),
            EventProducer::WorkspaceEventsReplicator,
        )
    }
}

impl Job for WorkspaceEventsReplicatorJob {
    fn job_type(&self) -> JobType {
        JobType::WorkspaceEventsReplicator
    }

    fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
        let mut appended = 0;
        let mut storage_error = None;

        for workspace in self.resolver.list_by_location(WorkspaceLocation::Remote) {
            match self.replicate_workspace(&workspace.id) {
                Ok(count) => {
                    debug!(workspace_id = %workspace.id, appended = count, "workspace replicated");
                    appended += count;
                }
                Err(ReplicationError::Queue(err)) => {
                    warn!(workspace_id = %workspace.id, error = %err, "failed to append replicated events");
                    storage_error.get_or_insert(err);
                }
                Err(err) => {
                    warn!(workspace_id = %workspace.id, error = %err, "failed to replicate workspace, skipping");
                }
            }
        }

        if appended > 0 {
            info!(appended, "new workspace events replicated");
            if let Some(trigger) = &self.downstream {
                trigger.execute(None).detach();
            }
        }

        match storage_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ConsumerId, InMemoryPersistentQueue};
    use crate::remote::InMemoryRemoteSource;
    use crate::test_support::{at, CountingTrigger};
    use crate::workspace::{StaticWorkspaceResolver, WorkspaceInfo};
    use profhub_core::FixedClock;

    struct Fixture {
        remote: Arc<InMemoryRemoteSource>,
        queue: Arc<InMemoryPersistentQueue>,
        trigger: Arc<CountingTrigger>,
        job: WorkspaceEventsReplicatorJob,
    }

    fn fixture(workspaces: &[&str]) -> Fixture {
        let remote = Arc::new(InMemoryRemoteSource::new());
        let queue = Arc::new(InMemoryPersistentQueue::new());
        let trigger = Arc::new(CountingTrigger::default());
        let resolver = Arc::new(StaticWorkspaceResolver::with_workspaces(
            workspaces.iter().map(|w| WorkspaceInfo::remote(*w)),
        ));
        let clock = Arc::new(FixedClock::new(at("2025-06-15T12:00:00Z")));
        let job = WorkspaceEventsReplicatorJob::new(remote.clone(), resolver, queue.clone(), clock)
            .with_downstream(trigger.clone());
        Fixture {
            remote,
            queue,
            trigger,
            job,
        }
    }

    fn remote_project(id: &str) -> RemoteProject {
        RemoteProject {
            origin_project_id: id.to_string(),
            name: id.to_string(),
            label: None,
            repository_type: None,
            attributes: Default::default(),
            created_at: at("2025-06-15T09:00:00Z"),
        }
    }

    #[test]
    fn sweep_orders_project_then_instances_then_sessions() {
        let f = fixture(&["ws-r"]);
        let ws = WorkspaceId::new("ws-r");
        f.remote.add_project(&ws, remote_project("p-1"));
        f.remote.add_session(
            &ws,
            RemoteSession {
                session_id: "s-1".to_string(),
                instance_id: "i-1".to_string(),
                origin_project_id: "p-1".to_string(),
                order: 1,
                relative_path: "i-1/s-1".to_string(),
                profiler_settings: None,
                created_at: at("2025-06-15T09:02:00Z"),
            },
        );
        f.remote.add_instance(
            &ws,
            RemoteInstance {
                instance_id: "i-1".to_string(),
                origin_project_id: "p-1".to_string(),
                relative_path: "i-1".to_string(),
                created_at: at("2025-06-15T09:01:00Z"),
            },
        );

        f.job.execute(JobContext::empty()).unwrap();

        let types: Vec<_> = f
            .queue
            .poll(&Topic::new("ws-r"), &ConsumerId::synchronizer())
            .unwrap()
            .into_iter()
            .map(|e| e.payload.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                WorkspaceEventType::ProjectCreated,
                WorkspaceEventType::ProjectInstanceCreated,
                WorkspaceEventType::ProjectInstanceSessionCreated,
            ]
        );
        assert_eq!(f.trigger.fired(), 1);
    }

    #[test]
    fn unreachable_workspace_does_not_block_others() {
        let f = fixture(&["ws-down", "ws-up"]);
        let down = WorkspaceId::new("ws-down");
        let up = WorkspaceId::new("ws-up");
        f.remote.add_project(&down, remote_project("p-down"));
        f.remote.add_project(&up, remote_project("p-up"));
        f.remote.set_reachable(&down, false);

        f.job.execute(JobContext::empty()).unwrap();

        assert!(f.queue.find_all(&Topic::for_workspace(&down)).unwrap().is_empty());
        assert_eq!(f.queue.find_all(&Topic::for_workspace(&up)).unwrap().len(), 1);
        assert_eq!(f.trigger.fired(), 1);
    }

    #[test]
    fn no_trigger_when_nothing_new() {
        let f = fixture(&["ws-r"]);
        f.job.execute(JobContext::empty()).unwrap();
        assert_eq!(f.trigger.fired(), 0);
    }
}
