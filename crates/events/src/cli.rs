//! Event files written by the command-line agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use profhub_core::WorkspaceId;

use crate::event::{EventProducer, WorkspaceEvent, WorkspaceEventType};

/// On-disk shape of one event file in the shared events folder.
///
/// Content is stored as a JSON string (the agent serializes it separately),
/// so it is re-parsed when converting into a [`WorkspaceEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliWorkspaceEvent {
    pub origin_event_id: String,
    pub origin_project_id: String,
    pub workspace_id: WorkspaceId,
    pub event_type: WorkspaceEventType,
    #[serde(default)]
    pub content: Option<String>,
    pub origin_created_at: DateTime<Utc>,
}

impl CliWorkspaceEvent {
    /// Convert into a queue event stamped with the time it was picked up.
    ///
    /// Content that is not valid JSON is preserved as a JSON string so the
    /// handler, not the reader, decides whether it is usable.
    pub fn into_workspace_event(self, picked_up_at: DateTime<Utc>) -> WorkspaceEvent {
        let content = match self.content {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(JsonValue::String(raw)),
            None => JsonValue::Object(Default::default()),
        };

        WorkspaceEvent {
            origin_event_id: self.origin_event_id,
            origin_project_id: self.origin_project_id,
            workspace_id: self.workspace_id,
            event_type: self.event_type,
            content,
            origin_created_at: self.origin_created_at,
            created_at: picked_up_at,
            producer: EventProducer::Cli,
        }
    }
}
