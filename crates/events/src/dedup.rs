//! Producer-side idempotency keys.

use serde::{Deserialize, Serialize};

use crate::event::WorkspaceEventType;

/// Identity used to make queue appends idempotent.
///
/// Derived from origin identity only, never from content, so observing the
/// same entity twice (even with drifting attributes) yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `{origin_project_id}:{event_type}:{origin_event_id}`
    pub fn for_origin(
        origin_project_id: &str,
        event_type: WorkspaceEventType,
        origin_event_id: &str,
    ) -> Self {
        Self(format!(
            "{origin_project_id}:{}:{origin_event_id}",
            event_type.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_origin_and_type_share_a_key() {
        let a = DedupKey::for_origin("proj-001", WorkspaceEventType::ProjectCreated, "proj-001");
        let b = DedupKey::for_origin("proj-001", WorkspaceEventType::ProjectCreated, "proj-001");
        assert_eq!(a, b);
    }

    #[test]
    fn type_and_project_are_part_of_identity() {
        let created = DedupKey::for_origin("proj-001", WorkspaceEventType::ProjectCreated, "evt-001");
        let deleted = DedupKey::for_origin("proj-001", WorkspaceEventType::ProjectDeleted, "evt-001");
        let other_project =
            DedupKey::for_origin("proj-002", WorkspaceEventType::ProjectCreated, "evt-001");

        assert_ne!(created, deleted);
        assert_ne!(created, other_project);
    }

    proptest! {
        #[test]
        fn key_is_a_pure_function_of_origin(project in "[a-z0-9-]{1,12}", origin in "[a-z0-9-]{1,12}") {
            let a = DedupKey::for_origin(&project, WorkspaceEventType::ProjectInstanceCreated, &origin);
            let b = DedupKey::for_origin(&project, WorkspaceEventType::ProjectInstanceCreated, &origin);
            prop_assert_eq!(a, b);
        }
    }
}
