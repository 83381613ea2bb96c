use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use profhub_core::WorkspaceId;

use crate::dedup::DedupKey;

/// Kind of lifecycle fact carried by a [`WorkspaceEvent`].
///
/// The type determines the shape of the event's `content`:
///
/// | Type | Content |
/// |---|---|
/// | `ProjectCreated` | [`ProjectCreatedContent`](crate::ProjectCreatedContent) |
/// | `ProjectInstanceCreated` | [`InstanceCreatedContent`](crate::InstanceCreatedContent) |
/// | `ProjectInstanceSessionCreated` | [`SessionCreatedContent`](crate::SessionCreatedContent) |
/// | `ProjectInstanceSessionFinished` | [`SessionFinishedContent`](crate::SessionFinishedContent) |
/// | `ProjectDeleted`, `ProjectInstanceFinished` | empty object |
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceEventType {
    ProjectCreated,
    ProjectDeleted,
    ProjectInstanceCreated,
    ProjectInstanceFinished,
    ProjectInstanceSessionCreated,
    ProjectInstanceSessionFinished,
}

impl WorkspaceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceEventType::ProjectCreated => "PROJECT_CREATED",
            WorkspaceEventType::ProjectDeleted => "PROJECT_DELETED",
            WorkspaceEventType::ProjectInstanceCreated => "PROJECT_INSTANCE_CREATED",
            WorkspaceEventType::ProjectInstanceFinished => "PROJECT_INSTANCE_FINISHED",
            WorkspaceEventType::ProjectInstanceSessionCreated => {
                "PROJECT_INSTANCE_SESSION_CREATED"
            }
            WorkspaceEventType::ProjectInstanceSessionFinished => {
                "PROJECT_INSTANCE_SESSION_FINISHED"
            }
        }
    }
}

impl core::fmt::Display for WorkspaceEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that produced an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventProducer {
    /// Command-line agent writing event files next to the recordings.
    Cli,
    /// Remote-repository sweep performed by the replicator job.
    WorkspaceEventsReplicator,
    /// Heartbeat-driven session/instance finish detection.
    SessionFinisher,
    /// Manually injected (tests, administrative tooling).
    Manual,
}

/// Failure decoding or encoding event content.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event {event_type} has malformed content: {source}")]
    MalformedContent {
        event_type: WorkspaceEventType,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode content for {event_type}: {source}")]
    Encode {
        event_type: WorkspaceEventType,
        #[source]
        source: serde_json::Error,
    },
}

/// One lifecycle fact about a project, instance or session.
///
/// Events are immutable once created. The triple (`origin_project_id`,
/// `event_type`, `origin_event_id`) identifies the fact regardless of when or
/// how often it was observed; producer-side deduplication keys on it
/// (see [`WorkspaceEvent::dedup_key`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    /// Id of the entity the event is about, as assigned by the origin.
    pub origin_event_id: String,
    /// Origin id of the project the entity belongs to.
    pub origin_project_id: String,
    pub workspace_id: WorkspaceId,
    pub event_type: WorkspaceEventType,
    /// Structured payload; shape depends on `event_type`.
    #[serde(default)]
    pub content: JsonValue,
    /// When the origin created the entity.
    pub origin_created_at: DateTime<Utc>,
    /// When the producer emitted the event.
    pub created_at: DateTime<Utc>,
    pub producer: EventProducer,
}

impl WorkspaceEvent {
    /// Build an event with typed content.
    #[allow(clippy::too_many_arguments)]
    pub fn with_content<C: Serialize>(
        origin_event_id: impl Into<String>,
        origin_project_id: impl Into<String>,
        workspace_id: WorkspaceId,
        event_type: WorkspaceEventType,
        content: &C,
        origin_created_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        producer: EventProducer,
    ) -> Result<Self, EventError> {
        let content = serde_json::to_value(content)
            .map_err(|source| EventError::Encode { event_type, source })?;
        Ok(Self {
            origin_event_id: origin_event_id.into(),
            origin_project_id: origin_project_id.into(),
            workspace_id,
            event_type,
            content,
            origin_created_at,
            created_at,
            producer,
        })
    }

    /// Decode the content into its typed form.
    pub fn content_as<C: DeserializeOwned>(&self) -> Result<C, EventError> {
        serde_json::from_value(self.content.clone()).map_err(|source| {
            EventError::MalformedContent {
                event_type: self.event_type,
                source,
            }
        })
    }

    /// Deterministic producer-side identity of this fact.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::for_origin(&self.origin_project_id, self.event_type, &self.origin_event_id)
    }
}
