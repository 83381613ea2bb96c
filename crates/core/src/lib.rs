//! `profhub-core` - shared building blocks for the profiling platform.
//!
//! This crate contains identifiers, the clock abstraction and the domain error
//! model. It has no infrastructure concerns.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{InstanceId, JobRunId, ProjectId, RepositoryId, SessionId, WorkspaceId};
