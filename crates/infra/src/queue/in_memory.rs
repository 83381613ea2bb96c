use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use profhub_core::{Clock, SystemClock};
use profhub_events::{DedupKey, WorkspaceEvent};

use super::r#trait::{ConsumerId, Offset, PersistentQueue, QueueEntry, QueueError, Topic};

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<Topic, Vec<QueueEntry>>,
    dedup: HashSet<(Topic, DedupKey)>,
    cursors: BTreeMap<(Topic, ConsumerId), Offset>,
    last_offset: Offset,
}

impl QueueState {
    fn push(&mut self, topic: &Topic, event: WorkspaceEvent, now: DateTime<Utc>) -> Offset {
        self.last_offset += 1;
        let offset = self.last_offset;
        self.entries.entry(topic.clone()).or_default().push(QueueEntry {
            offset,
            payload: event,
            appended_at: now,
        });
        offset
    }
}

/// In-memory persistent queue.
///
/// Intended for tests/dev. Offsets come from one global sequence (like the
/// Postgres backend), which keeps them strictly increasing per topic. Dedup
/// records and cursors are kept in separate maps so either can be inspected
/// on its own.
pub struct InMemoryPersistentQueue {
    state: RwLock<QueueState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryPersistentQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistentQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            clock,
        }
    }

    /// Current cursor for a consumer, if it has ever polled or acknowledged.
    pub fn cursor(&self, topic: &Topic, consumer: &ConsumerId) -> Option<Offset> {
        let state = self.state.read().ok()?;
        state.cursors.get(&(topic.clone(), consumer.clone())).copied()
    }

    /// Number of dedup records held for `topic`.
    pub fn dedup_records(&self, topic: &Topic) -> usize {
        self.state
            .read()
            .map(|s| s.dedup.iter().filter(|(t, _)| t == topic).count())
            .unwrap_or(0)
    }

    pub(crate) fn topic_names(&self) -> Result<Vec<Topic>, QueueError> {
        let state = self.read("topics")?;
        let mut topics: Vec<Topic> = state.entries.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    pub(crate) fn cursors_for(&self, topic: &Topic) -> Result<Vec<(ConsumerId, Offset)>, QueueError> {
        let state = self.read("cursors_for")?;
        Ok(state
            .cursors
            .iter()
            .filter(|((t, _), _)| t == topic)
            .map(|((_, c), o)| (c.clone(), *o))
            .collect())
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, QueueState>, QueueError> {
        self.state
            .read()
            .map_err(|_| QueueError::storage(operation, "lock poisoned"))
    }

    fn write(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockWriteGuard<'_, QueueState>, QueueError> {
        self.state
            .write()
            .map_err(|_| QueueError::storage(operation, "lock poisoned"))
    }
}

impl PersistentQueue for InMemoryPersistentQueue {
    fn append(&self, topic: &Topic, event: WorkspaceEvent) -> Result<Offset, QueueError> {
        let now = self.clock.now();
        let mut state = self.write("append")?;
        Ok(state.push(topic, event, now))
    }

    fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<WorkspaceEvent>,
        dedup_key: &dyn Fn(&WorkspaceEvent) -> DedupKey,
    ) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let mut state = self.write("append_batch")?;

        let mut appended = 0;
        for event in events {
            let key = dedup_key(&event);
            if !state.dedup.insert((topic.clone(), key)) {
                continue;
            }
            state.push(topic, event, now);
            appended += 1;
        }
        Ok(appended)
    }

    fn poll(&self, topic: &Topic, consumer: &ConsumerId) -> Result<Vec<QueueEntry>, QueueError> {
        let mut state = self.write("poll")?;
        let cursor = *state
            .cursors
            .entry((topic.clone(), consumer.clone()))
            .or_insert(0);

        Ok(state
            .entries
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.offset > cursor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn acknowledge(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
        upto: Offset,
    ) -> Result<(), QueueError> {
        let mut state = self.write("acknowledge")?;
        let cursor = state
            .cursors
            .entry((topic.clone(), consumer.clone()))
            .or_insert(0);
        if upto > *cursor {
            *cursor = upto;
        }
        Ok(())
    }

    fn find_all(&self, topic: &Topic) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.read("find_all")?;
        Ok(state.entries.get(topic).cloned().unwrap_or_default())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut state = self.write("delete_older_than")?;
        let mut deleted = 0u64;
        for entries in state.entries.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.appended_at >= cutoff);
            deleted += (before - entries.len()) as u64;
        }
        Ok(deleted)
    }
}
