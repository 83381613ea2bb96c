use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use profhub_core::WorkspaceId;
use profhub_events::{DedupKey, WorkspaceEvent};

/// Position of an entry within a topic.
///
/// Offsets are assigned at append time, strictly increasing per topic and
/// never reused. `0` means "nothing acknowledged yet".
pub type Offset = u64;

/// Stream identifier. One topic per workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn for_workspace(workspace_id: &WorkspaceId) -> Self {
        Self(workspace_id.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an independent reader of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Consumer role used by the synchronizer job.
    pub fn synchronizer() -> Self {
        Self::new("SYNCHRONIZER")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event with its queue metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub offset: Offset,
    pub payload: WorkspaceEvent,
    pub appended_at: DateTime<Utc>,
}

/// Queue operation error.
///
/// Every variant is a storage-level failure. Callers are expected to
/// propagate these rather than swallow them: append is assumed reliable.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage failure in {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("failed to (de)serialize queue payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue backend requires a tokio runtime: {0}")]
    Runtime(String),
}

impl QueueError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Durable, ordered, multi-reader event log with idempotent writes.
///
/// ## Offsets
///
/// `append`/`append_batch` assign offsets that are strictly increasing within
/// a topic. Entries are always returned ascending by offset.
///
/// ## Deduplication
///
/// `append_batch` computes a [`DedupKey`] per event. If a record for
/// `(topic, key)` already exists the event is skipped: no offset is consumed
/// and no consumer ever sees a duplicate. Concurrent producers are serialized
/// by the dedup constraint itself, not by in-process locks. Dedup records are
/// kept when their events are deleted by retention.
///
/// ## Cursors
///
/// Each `(topic, consumer)` pair has its own cursor, created lazily at `0`.
/// `poll` never moves it; only `acknowledge` does, and never backwards.
/// Acknowledging for one consumer has no effect on any other.
pub trait PersistentQueue: Send + Sync {
    /// Append one event without deduplication and return its offset.
    fn append(&self, topic: &Topic, event: WorkspaceEvent) -> Result<Offset, QueueError>;

    /// Append events in input order, skipping those whose dedup key is
    /// already recorded for `topic`. Returns how many were appended.
    fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<WorkspaceEvent>,
        dedup_key: &dyn Fn(&WorkspaceEvent) -> DedupKey,
    ) -> Result<usize, QueueError>;

    /// All entries past the consumer's cursor, ascending by offset.
    ///
    /// Returns an empty list for unknown topics.
    fn poll(&self, topic: &Topic, consumer: &ConsumerId) -> Result<Vec<QueueEntry>, QueueError>;

    /// Advance the consumer's cursor to `upto`. No-op when `upto` is at or
    /// below the current cursor.
    fn acknowledge(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
        upto: Offset,
    ) -> Result<(), QueueError>;

    /// Every stored entry of `topic`, ignoring cursors. Diagnostic use only.
    fn find_all(&self, topic: &Topic) -> Result<Vec<QueueEntry>, QueueError>;

    /// Delete entries (of every topic) appended strictly before `cutoff`.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError>;
}

impl<Q> PersistentQueue for Arc<Q>
where
    Q: PersistentQueue + ?Sized,
{
    fn append(&self, topic: &Topic, event: WorkspaceEvent) -> Result<Offset, QueueError> {
        (**self).append(topic, event)
    }

    fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<WorkspaceEvent>,
        dedup_key: &dyn Fn(&WorkspaceEvent) -> DedupKey,
    ) -> Result<usize, QueueError> {
        (**self).append_batch(topic, events, dedup_key)
    }

    fn poll(&self, topic: &Topic, consumer: &ConsumerId) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).poll(topic, consumer)
    }

    fn acknowledge(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
        upto: Offset,
    ) -> Result<(), QueueError> {
        (**self).acknowledge(topic, consumer, upto)
    }

    fn find_all(&self, topic: &Topic) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).find_all(topic)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        (**self).delete_older_than(cutoff)
    }
}
