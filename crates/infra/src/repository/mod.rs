//! Durable store facade for projects, repositories, instances and sessions,
//! plus the message/alert notice stores.

pub mod in_memory;
pub mod notices;
pub mod r#trait;

pub use in_memory::InMemoryPlatformRepository;
pub use notices::{InMemoryNoticeStore, Notice, NoticeKind, NoticeStore};
pub use r#trait::{
    InstanceRecord, InstanceStatus, PlatformRepository, ProjectRecord, RepositoryError,
    RepositoryRecord, SessionRecord,
};
