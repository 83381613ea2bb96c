//! Durable, topic-scoped event queue with per-consumer cursors.
//!
//! One topic per workspace. Producers append (optionally deduplicated by a
//! caller-supplied [`DedupKey`](profhub_events::DedupKey)); consumers poll
//! everything past their cursor and acknowledge explicitly.

pub mod in_memory;
pub mod inspect;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryPersistentQueue;
pub use inspect::{ConsumerLag, QueueInspection, TopicStats};
pub use postgres::PostgresPersistentQueue;
pub use r#trait::{ConsumerId, Offset, PersistentQueue, QueueEntry, QueueError, Topic};
