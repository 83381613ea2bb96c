//! Remote entity source consumed by the replicator's producer half.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use profhub_core::WorkspaceId;
use profhub_events::RepositoryType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote source unreachable for workspace {0}")]
    Unreachable(WorkspaceId),

    #[error("remote source returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    pub origin_project_id: String,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub repository_type: Option<RepositoryType>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstance {
    pub instance_id: String,
    pub origin_project_id: String,
    pub relative_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub session_id: String,
    pub instance_id: String,
    pub origin_project_id: String,
    pub order: u32,
    pub relative_path: String,
    #[serde(default)]
    pub profiler_settings: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Source of the current entities of remote workspaces.
pub trait RemoteEntitySource: Send + Sync {
    fn list_projects(&self, workspace_id: &WorkspaceId) -> Result<Vec<RemoteProject>, RemoteError>;

    fn list_instances(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Vec<RemoteInstance>, RemoteError>;

    fn list_sessions(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Vec<RemoteSession>, RemoteError>;
}

#[derive(Debug, Default)]
struct RemoteState {
    projects: BTreeMap<WorkspaceId, Vec<RemoteProject>>,
    instances: BTreeMap<WorkspaceId, Vec<RemoteInstance>>,
    sessions: BTreeMap<WorkspaceId, Vec<RemoteSession>>,
    unreachable: HashSet<WorkspaceId>,
}

/// In-process remote source with switchable reachability per workspace.
#[derive(Debug, Default)]
pub struct InMemoryRemoteSource {
    state: RwLock<RemoteState>,
}

impl InMemoryRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, workspace_id: &WorkspaceId, project: RemoteProject) {
        if let Ok(mut state) = self.state.write() {
            state.projects.entry(workspace_id.clone()).or_default().push(project);
        }
    }

    pub fn add_instance(&self, workspace_id: &WorkspaceId, instance: RemoteInstance) {
        if let Ok(mut state) = self.state.write() {
            state.instances.entry(workspace_id.clone()).or_default().push(instance);
        }
    }

    pub fn add_session(&self, workspace_id: &WorkspaceId, session: RemoteSession) {
        if let Ok(mut state) = self.state.write() {
            state.sessions.entry(workspace_id.clone()).or_default().push(session);
        }
    }

    pub fn set_reachable(&self, workspace_id: &WorkspaceId, reachable: bool) {
        if let Ok(mut state) = self.state.write() {
            if reachable {
                state.unreachable.remove(workspace_id);
            } else {
                state.unreachable.insert(workspace_id.clone());
            }
        }
    }

    fn read(&self, workspace_id: &WorkspaceId) -> Result<std::sync::RwLockReadGuard<'_, RemoteState>, RemoteError> {
        let state = self
            .state
            .read()
            .map_err(|_| RemoteError::InvalidResponse("lock poisoned".to_string()))?;
        if state.unreachable.contains(workspace_id) {
            return Err(RemoteError::Unreachable(workspace_id.clone()));
        }
        Ok(state)
    }
}

impl RemoteEntitySource for InMemoryRemoteSource {
    fn list_projects(&self, workspace_id: &WorkspaceId) -> Result<Vec<RemoteProject>, RemoteError> {
        let state = self.read(workspace_id)?;
        Ok(state.projects.get(workspace_id).cloned().unwrap_or_default())
    }

    fn list_instances(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Vec<RemoteInstance>, RemoteError> {
        let state = self.read(workspace_id)?;
        Ok(state
            .instances
            .get(workspace_id)
            .map(|all| {
                all.iter()
                    .filter(|i| i.origin_project_id == origin_project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_sessions(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Vec<RemoteSession>, RemoteError> {
        let state = self.read(workspace_id)?;
        Ok(state
            .sessions
            .get(workspace_id)
            .map(|all| {
                all.iter()
                    .filter(|s| s.origin_project_id == origin_project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
