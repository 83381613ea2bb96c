//! Read-only queue inspection (topic size, consumer lag).

use serde::{Deserialize, Serialize};

use super::in_memory::InMemoryPersistentQueue;
use super::r#trait::{ConsumerId, Offset, PersistentQueue, QueueError, Topic};

/// How far one consumer is behind the head of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerLag {
    pub consumer: ConsumerId,
    pub last_acknowledged: Offset,
    /// Entries past the cursor.
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    pub topic: Topic,
    pub entries: u64,
    /// Highest offset still stored, `0` if empty.
    pub head: Offset,
    pub consumers: Vec<ConsumerLag>,
}

/// Async inspection interface used for startup and diagnostic logging.
#[async_trait::async_trait]
pub trait QueueInspection: Send + Sync {
    async fn topic_stats(&self, topic: &Topic) -> Result<TopicStats, QueueError>;

    /// Topics that currently hold entries.
    async fn topics(&self) -> Result<Vec<Topic>, QueueError>;
}

#[async_trait::async_trait]
impl QueueInspection for InMemoryPersistentQueue {
    async fn topic_stats(&self, topic: &Topic) -> Result<TopicStats, QueueError> {
        let entries = self.find_all(topic)?;
        let head = entries.last().map(|e| e.offset).unwrap_or(0);

        let consumers = self
            .cursors_for(topic)?
            .into_iter()
            .map(|(consumer, last_acknowledged)| ConsumerLag {
                pending: entries.iter().filter(|e| e.offset > last_acknowledged).count() as u64,
                consumer,
                last_acknowledged,
            })
            .collect();

        Ok(TopicStats {
            topic: topic.clone(),
            entries: entries.len() as u64,
            head,
            consumers,
        })
    }

    async fn topics(&self) -> Result<Vec<Topic>, QueueError> {
        self.topic_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::project_created;

    #[tokio::test]
    async fn reports_pending_entries_per_consumer() {
        let queue = InMemoryPersistentQueue::new();
        let topic = Topic::new("ws-001");
        for id in ["p-1", "p-2", "p-3"] {
            queue.append(&topic, project_created("ws-001", id)).unwrap();
        }
        queue.acknowledge(&topic, &ConsumerId::new("fast"), 3).unwrap();
        queue.acknowledge(&topic, &ConsumerId::new("slow"), 1).unwrap();

        let stats = queue.topic_stats(&topic).await.unwrap();

        assert_eq!(stats.entries, 3);
        assert_eq!(stats.head, 3);
        let pending: Vec<_> = stats
            .consumers
            .iter()
            .map(|c| (c.consumer.as_str().to_string(), c.pending))
            .collect();
        assert_eq!(pending, vec![("fast".to_string(), 0), ("slow".to_string(), 2)]);
        assert_eq!(queue.topics().await.unwrap(), vec![topic]);
    }
}
