use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use profhub_core::{InstanceId, ProjectId, RepositoryId, SessionId, WorkspaceId};
use profhub_events::RepositoryType;

/// A project materialized from a `PROJECT_CREATED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub origin_project_id: String,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub label: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Recording repository attached to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepositoryId,
    pub project_id: ProjectId,
    pub repository_type: RepositoryType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created, no session seen yet.
    Pending,
    /// At least one session exists and not all are finished.
    Active,
    Finished,
}

impl InstanceStatus {
    /// Status implied by the instance's sessions.
    ///
    /// `Finished` iff there is at least one session and every session is
    /// finished; `Pending` with no sessions; `Active` otherwise.
    pub fn derive(sessions: &[SessionRecord]) -> Self {
        if sessions.is_empty() {
            InstanceStatus::Pending
        } else if sessions.iter().all(SessionRecord::is_finished) {
            InstanceStatus::Finished
        } else {
            InstanceStatus::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub project_id: ProjectId,
    pub relative_path: String,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub instance_id: InstanceId,
    pub project_id: ProjectId,
    pub order: u32,
    /// Session directory, relative to the workspaces root.
    pub relative_path: String,
    pub profiler_settings: Option<String>,
    /// Origin creation time; the heartbeat fallback measures from here.
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("repository storage failure: {0}")]
    Storage(String),
}

/// Repository facade over the durable platform store.
///
/// Creation methods reject duplicates with [`RepositoryError::Conflict`];
/// callers that must be idempotent look up first.
pub trait PlatformRepository: Send + Sync {
    fn find_project_by_origin(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Option<ProjectRecord>, RepositoryError>;

    fn find_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>, RepositoryError>;

    fn list_projects(&self) -> Result<Vec<ProjectRecord>, RepositoryError>;

    fn create_project(&self, project: ProjectRecord) -> Result<(), RepositoryError>;

    fn find_repository(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<RepositoryRecord>, RepositoryError>;

    fn create_repository(&self, repository: RepositoryRecord) -> Result<(), RepositoryError>;

    fn find_instance(&self, id: &InstanceId) -> Result<Option<InstanceRecord>, RepositoryError>;

    fn create_instance(&self, instance: InstanceRecord) -> Result<(), RepositoryError>;

    /// Instances of the project, ordered by id.
    fn find_instances_by_project(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<InstanceRecord>, RepositoryError>;

    fn update_instance_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    fn find_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RepositoryError>;

    fn create_session(&self, session: SessionRecord) -> Result<(), RepositoryError>;

    /// Sessions of the project with no `finished_at`, ordered by instance then order.
    fn find_unfinished_sessions(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<SessionRecord>, RepositoryError>;

    fn find_sessions_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<SessionRecord>, RepositoryError>;

    fn record_heartbeat(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Set `finished_at` once. Returns `false` if the session was already finished.
    fn mark_session_finished(
        &self,
        session_id: &SessionId,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}
