//! Per-type handlers that materialize workspace events into the platform store.
//!
//! Delivery is at-least-once, so every handler is idempotent: creations look
//! up first and treat an existing row as already handled.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use profhub_core::{Clock, InstanceId, ProjectId, RepositoryId, SessionId, WorkspaceId};
use profhub_events::{
    EventError, InstanceCreatedContent, ProjectCreatedContent, SessionCreatedContent,
    WorkspaceEvent, WorkspaceEventType,
};

use crate::repository::{
    InstanceRecord, InstanceStatus, PlatformRepository, ProjectRecord, RepositoryError,
    RepositoryRecord, SessionRecord,
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Content(#[from] EventError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("project '{origin_project_id}' not found in workspace {workspace_id}")]
    MissingProject {
        workspace_id: WorkspaceId,
        origin_project_id: String,
    },

    #[error("project '{0}' has no repository")]
    MissingRepository(String),

    #[error("instance '{0}' not found")]
    MissingInstance(String),
}

/// Result of dispatching one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler is bound to the event's type.
    Ignored,
}

pub trait WorkspaceEventHandler: Send + Sync {
    fn event_type(&self) -> WorkspaceEventType;

    fn handle(&self, event: &WorkspaceEvent) -> Result<(), HandlerError>;
}

/// Dispatch table from event type to handler.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<WorkspaceEventType, Box<dyn WorkspaceEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the project, instance and session creation handlers.
    pub fn standard(repository: Arc<dyn PlatformRepository>, clock: Arc<dyn Clock>) -> Self {
        Self::new()
            .with_handler(ProjectCreatedHandler::new(repository.clone(), clock))
            .with_handler(InstanceCreatedHandler::new(repository.clone()))
            .with_handler(SessionCreatedHandler::new(repository))
    }

    /// Bind a handler, replacing any previous one for the same type.
    pub fn with_handler(mut self, handler: impl WorkspaceEventHandler + 'static) -> Self {
        self.handlers.insert(handler.event_type(), Box::new(handler));
        self
    }

    pub fn dispatch(&self, event: &WorkspaceEvent) -> Result<DispatchOutcome, HandlerError> {
        match self.handlers.get(&event.event_type) {
            Some(handler) => {
                handler.handle(event)?;
                Ok(DispatchOutcome::Handled)
            }
            None => {
                debug!(event_type = %event.event_type, "no handler bound, ignoring event");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}

fn resolve_project(
    repository: &dyn PlatformRepository,
    event: &WorkspaceEvent,
) -> Result<ProjectRecord, HandlerError> {
    repository
        .find_project_by_origin(&event.workspace_id, &event.origin_project_id)?
        .ok_or_else(|| HandlerError::MissingProject {
            workspace_id: event.workspace_id.clone(),
            origin_project_id: event.origin_project_id.clone(),
        })
}

/// `PROJECT_CREATED`: find-or-create the project, then attach a repository
/// when the event declares a type and none exists yet.
pub struct ProjectCreatedHandler {
    repository: Arc<dyn PlatformRepository>,
    clock: Arc<dyn Clock>,
}

impl ProjectCreatedHandler {
    pub fn new(repository: Arc<dyn PlatformRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }
}

impl WorkspaceEventHandler for ProjectCreatedHandler {
    fn event_type(&self) -> WorkspaceEventType {
        WorkspaceEventType::ProjectCreated
    }

    fn handle(&self, event: &WorkspaceEvent) -> Result<(), HandlerError> {
        let content: ProjectCreatedContent = event.content_as()?;

        let project = match self
            .repository
            .find_project_by_origin(&event.workspace_id, &event.origin_project_id)?
        {
            Some(existing) => existing,
            None => {
                let project = ProjectRecord {
                    id: ProjectId::new(),
                    origin_project_id: event.origin_project_id.clone(),
                    workspace_id: event.workspace_id.clone(),
                    name: content.project_name.clone(),
                    label: content.project_label.clone(),
                    attributes: content.attributes.clone(),
                    created_at: event.origin_created_at,
                };
                self.repository.create_project(project.clone())?;
                debug!(
                    workspace_id = %event.workspace_id,
                    origin_project_id = %event.origin_project_id,
                    project_id = %project.id,
                    "project created"
                );
                project
            }
        };

        if let Some(repository_type) = content.repository_type {
            if self.repository.find_repository(project.id)?.is_none() {
                self.repository.create_repository(RepositoryRecord {
                    id: RepositoryId::new(),
                    project_id: project.id,
                    repository_type,
                    created_at: self.clock.now(),
                })?;
            }
        }
        Ok(())
    }
}

/// `PROJECT_INSTANCE_CREATED`: create a PENDING instance started at the
/// event's origin time.
pub struct InstanceCreatedHandler {
    repository: Arc<dyn PlatformRepository>,
}

impl InstanceCreatedHandler {
    pub fn new(repository: Arc<dyn PlatformRepository>) -> Self {
        Self { repository }
    }
}

impl WorkspaceEventHandler for InstanceCreatedHandler {
    fn event_type(&self) -> WorkspaceEventType {
        WorkspaceEventType::ProjectInstanceCreated
    }

    fn handle(&self, event: &WorkspaceEvent) -> Result<(), HandlerError> {
        let content: InstanceCreatedContent = event.content_as()?;
        let project = resolve_project(self.repository.as_ref(), event)?;
        let instance_id = InstanceId::new(event.origin_event_id.clone());

        if self.repository.find_instance(&instance_id)?.is_some() {
            debug!(instance_id = %instance_id, "instance already exists");
            return Ok(());
        }

        self.repository.create_instance(InstanceRecord {
            id: instance_id,
            project_id: project.id,
            relative_path: content.relative_instance_path,
            status: InstanceStatus::Pending,
            started_at: event.origin_created_at,
            finished_at: None,
        })?;
        Ok(())
    }
}

/// `PROJECT_INSTANCE_SESSION_CREATED`: create the session under its instance
/// and promote a PENDING instance to ACTIVE.
pub struct SessionCreatedHandler {
    repository: Arc<dyn PlatformRepository>,
}

impl SessionCreatedHandler {
    pub fn new(repository: Arc<dyn PlatformRepository>) -> Self {
        Self { repository }
    }
}

impl WorkspaceEventHandler for SessionCreatedHandler {
    fn event_type(&self) -> WorkspaceEventType {
        WorkspaceEventType::ProjectInstanceSessionCreated
    }

    fn handle(&self, event: &WorkspaceEvent) -> Result<(), HandlerError> {
        let content: SessionCreatedContent = event.content_as()?;
        let project = resolve_project(self.repository.as_ref(), event)?;
        if self.repository.find_repository(project.id)?.is_none() {
            return Err(HandlerError::MissingRepository(project.origin_project_id));
        }

        let instance_id = InstanceId::new(content.instance_id.clone());
        let instance = self
            .repository
            .find_instance(&instance_id)?
            .ok_or_else(|| HandlerError::MissingInstance(content.instance_id.clone()))?;

        let session_id = SessionId::new(event.origin_event_id.clone());
        if self.repository.find_session(&session_id)?.is_some() {
            debug!(session_id = %session_id, "session already exists");
            return Ok(());
        }

        self.repository.create_session(SessionRecord {
            id: session_id,
            instance_id: instance.id.clone(),
            project_id: project.id,
            order: content.order,
            relative_path: content.relative_session_path,
            profiler_settings: content.profiler_settings,
            created_at: event.origin_created_at,
            last_heartbeat_at: None,
            finished_at: None,
        })?;

        if instance.status == InstanceStatus::Pending {
            self.repository
                .update_instance_status(&instance.id, InstanceStatus::Active, None)?;
        }
        Ok(())
    }
}
