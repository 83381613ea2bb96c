//! Typed payloads carried in [`WorkspaceEvent::content`](crate::WorkspaceEvent).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Recording format a project's repository holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryType {
    AsyncProfiler,
    Jdk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreatedContent {
    pub project_name: String,
    #[serde(default)]
    pub project_label: Option<String>,
    /// Repository to attach; `None` leaves the project without recordings.
    #[serde(default)]
    pub repository_type: Option<RepositoryType>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCreatedContent {
    pub relative_instance_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedContent {
    pub instance_id: String,
    /// 1-based position of the session within its instance.
    pub order: u32,
    pub relative_session_path: String,
    #[serde(default)]
    pub profiler_settings: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFinishedContent {
    pub instance_id: String,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}
