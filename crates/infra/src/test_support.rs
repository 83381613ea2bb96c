//! Event builders shared by unit and integration tests.

use chrono::{DateTime, Utc};
use profhub_core::WorkspaceId;
use profhub_events::{
    EventProducer, InstanceCreatedContent, ProjectCreatedContent, RepositoryType,
    SessionCreatedContent, WorkspaceEvent, WorkspaceEventType,
};

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid rfc3339 timestamp")
        .with_timezone(&Utc)
}

pub fn project_created(workspace: &str, origin_project_id: &str) -> WorkspaceEvent {
    WorkspaceEvent::with_content(
        origin_project_id,
        origin_project_id,
        WorkspaceId::new(workspace),
        WorkspaceEventType::ProjectCreated,
        &ProjectCreatedContent {
            project_name: format!("Project {origin_project_id}"),
            project_label: None,
            repository_type: Some(RepositoryType::AsyncProfiler),
            attributes: Default::default(),
        },
        at("2025-06-15T10:00:00Z"),
        at("2025-06-15T10:00:00Z"),
        EventProducer::Manual,
    )
    .expect("content encodes")
}

pub fn instance_created(workspace: &str, origin_project_id: &str, instance: &str) -> WorkspaceEvent {
    WorkspaceEvent::with_content(
        instance,
        origin_project_id,
        WorkspaceId::new(workspace),
        WorkspaceEventType::ProjectInstanceCreated,
        &InstanceCreatedContent {
            relative_instance_path: format!("{instance}-dir"),
        },
        at("2025-06-15T10:01:00Z"),
        at("2025-06-15T10:01:00Z"),
        EventProducer::Manual,
    )
    .expect("content encodes")
}

pub fn session_created(
    workspace: &str,
    origin_project_id: &str,
    instance: &str,
    session: &str,
) -> WorkspaceEvent {
    WorkspaceEvent::with_content(
        session,
        origin_project_id,
        WorkspaceId::new(workspace),
        WorkspaceEventType::ProjectInstanceSessionCreated,
        &SessionCreatedContent {
            instance_id: instance.to_string(),
            order: 1,
            relative_session_path: format!("{instance}-dir/{session}"),
            profiler_settings: None,
        },
        at("2025-06-15T10:02:00Z"),
        at("2025-06-15T10:02:00Z"),
        EventProducer::Manual,
    )
    .expect("content encodes")
}

/// Trigger that counts executions and completes immediately.
#[derive(Debug, Default)]
pub struct CountingTrigger {
    fired: std::sync::atomic::AtomicUsize,
}

impl CountingTrigger {
    pub fn fired(&self) -> usize {
        self.fired.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl crate::scheduler::SchedulerTrigger for CountingTrigger {
    fn execute(
        &self,
        _descriptor: Option<crate::scheduler::JobDescriptor>,
    ) -> crate::scheduler::TriggerHandle {
        self.fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        crate::scheduler::TriggerHandle::ready(Ok(()))
    }
}
