//! Workspace resolution.
//!
//! Decides whether an event's target workspace is known ("retry later"
//! otherwise) and which workspaces jobs should sweep.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use profhub_core::WorkspaceId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceLocation {
    /// Recordings live on this host.
    Local,
    /// Entities are mirrored from a remote source.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: WorkspaceId,
    pub name: String,
    pub location: WorkspaceLocation,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub trait WorkspaceResolver: Send + Sync {
    fn resolve(&self, id: &WorkspaceId) -> Option<WorkspaceInfo>;

    /// Every known workspace id, in stable order.
    fn list_workspace_ids(&self) -> Vec<WorkspaceId>;

    /// Known workspaces filtered by location.
    fn list_by_location(&self, location: WorkspaceLocation) -> Vec<WorkspaceInfo> {
        self.list_workspace_ids()
            .iter()
            .filter_map(|id| self.resolve(id))
            .filter(|w| w.location == location)
            .collect()
    }
}

/// Resolver backed by a mutable in-process registry.
#[derive(Debug, Default)]
pub struct StaticWorkspaceResolver {
    workspaces: RwLock<BTreeMap<WorkspaceId, WorkspaceInfo>>,
}

impl StaticWorkspaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspaces(workspaces: impl IntoIterator<Item = WorkspaceInfo>) -> Self {
        let resolver = Self::new();
        for workspace in workspaces {
            resolver.register(workspace);
        }
        resolver
    }

    pub fn register(&self, workspace: WorkspaceInfo) {
        if let Ok(mut map) = self.workspaces.write() {
            map.insert(workspace.id.clone(), workspace);
        }
    }

    pub fn remove(&self, id: &WorkspaceId) -> Option<WorkspaceInfo> {
        self.workspaces.write().ok()?.remove(id)
    }
}

impl WorkspaceResolver for StaticWorkspaceResolver {
    fn resolve(&self, id: &WorkspaceId) -> Option<WorkspaceInfo> {
        self.workspaces.read().ok()?.get(id).cloned()
    }

    fn list_workspace_ids(&self) -> Vec<WorkspaceId> {
        self.workspaces
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl WorkspaceInfo {
    pub fn local(id: impl Into<String>) -> Self {
        let id = WorkspaceId::new(id);
        Self {
            name: id.to_string(),
            id,
            location: WorkspaceLocation::Local,
            path: None,
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            location: WorkspaceLocation::Remote,
            ..Self::local(id)
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_workspace_resolves_to_none_until_registered() {
        let resolver = StaticWorkspaceResolver::new();
        let id = WorkspaceId::new("ws-late");
        assert!(resolver.resolve(&id).is_none());

        resolver.register(WorkspaceInfo::local("ws-late"));
        assert_eq!(resolver.resolve(&id).map(|w| w.id), Some(id));
    }

    #[test]
    fn filters_by_location() {
        let resolver = StaticWorkspaceResolver::with_workspaces([
            WorkspaceInfo::local("ws-a"),
            WorkspaceInfo::remote("ws-b"),
        ]);
        let remote = resolver.list_by_location(WorkspaceLocation::Remote);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id.as_str(), "ws-b");
    }
}
