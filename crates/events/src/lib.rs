//! Workspace lifecycle events.
//!
//! These are the facts replicated from producers (CLI, remote repositories,
//! the session finisher) into the per-workspace persistent queue and
//! materialized by the synchronizer.

pub mod cli;
pub mod content;
pub mod dedup;
pub mod event;

pub use cli::CliWorkspaceEvent;
pub use content::{
    InstanceCreatedContent, ProjectCreatedContent, RepositoryType, SessionCreatedContent,
    SessionFinishedContent,
};
pub use dedup::DedupKey;
pub use event::{EventError, EventProducer, WorkspaceEvent, WorkspaceEventType};
