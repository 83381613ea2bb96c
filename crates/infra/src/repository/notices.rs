//! Message and alert notices surfaced to users.
//!
//! Both live in append-only stores and are only ever removed by retention.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use profhub_core::{ProjectId, WorkspaceId};

use super::r#trait::RepositoryError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Message,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub kind: NoticeKind,
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(
        kind: NoticeKind,
        workspace_id: WorkspaceId,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            workspace_id,
            project_id: None,
            title: title.into(),
            body: body.into(),
            created_at,
        }
    }

    pub fn for_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

pub trait NoticeStore: Send + Sync {
    fn insert(&self, notice: Notice) -> Result<(), RepositoryError>;

    /// Notices for a workspace, newest first.
    fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<Notice>, RepositoryError>;

    /// Delete notices created strictly before `cutoff`.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// In-memory notice store, one instance per [`NoticeKind`].
#[derive(Debug)]
pub struct InMemoryNoticeStore {
    kind: NoticeKind,
    notices: RwLock<Vec<Notice>>,
}

impl InMemoryNoticeStore {
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            kind,
            notices: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> NoticeKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.notices.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NoticeStore for InMemoryNoticeStore {
    fn insert(&self, notice: Notice) -> Result<(), RepositoryError> {
        if notice.kind != self.kind {
            return Err(RepositoryError::Storage(format!(
                "{:?} notice written to {:?} store",
                notice.kind, self.kind
            )));
        }
        self.notices
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?
            .push(notice);
        Ok(())
    }

    fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<Notice>, RepositoryError> {
        let notices = self
            .notices
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        let mut matching: Vec<_> = notices
            .iter()
            .filter(|n| &n.workspace_id == workspace_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut notices = self
            .notices
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        let before = notices.len();
        notices.retain(|n| n.created_at >= cutoff);
        Ok((before - notices.len()) as u64)
    }
}
