//! Postgres-backed persistent queue.
//!
//! ## Schema
//!
//! | Table | Key | Purpose |
//! |---|---|---|
//! | `persistent_queue_events` | `offset_id` (BIGSERIAL) | appended entries, payload as JSONB |
//! | `persistent_queue_dedup` | `(topic, dedup_key)` | producer idempotency guard |
//! | `persistent_queue_consumers` | `(topic, consumer_id)` | per-consumer cursor |
//!
//! Dedup and cursors are separate relations: one protects producers, the
//! other tracks consumer progress, and retention only touches the events table.
//!
//! ## Ordering
//!
//! Offsets come from a single sequence. Appends to one topic take a
//! transaction-scoped advisory lock on the topic so that offsets become
//! visible in the order they were assigned; otherwise a consumer could
//! acknowledge past an offset that commits later.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | QueueError |
//! |------------|----------------------|------------|
//! | Database | any | `Storage` (message includes the operation) |
//! | PoolClosed | N/A | `Storage` |
//! | ColumnDecode / payload decode | N/A | `Storage` |
//! | Other | N/A | `Storage` |

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use profhub_core::{Clock, SystemClock};
use profhub_events::{DedupKey, WorkspaceEvent};

use super::inspect::{ConsumerLag, QueueInspection, TopicStats};
use super::r#trait::{ConsumerId, Offset, PersistentQueue, QueueEntry, QueueError, Topic};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS persistent_queue_events (
        offset_id BIGSERIAL PRIMARY KEY,
        topic TEXT NOT NULL,
        dedup_key TEXT NULL,
        payload JSONB NOT NULL,
        appended_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS persistent_queue_events_topic_offset_idx
        ON persistent_queue_events (topic, offset_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS persistent_queue_events_appended_at_idx
        ON persistent_queue_events (appended_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS persistent_queue_dedup (
        topic TEXT NOT NULL,
        dedup_key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (topic, dedup_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS persistent_queue_consumers (
        topic TEXT NOT NULL,
        consumer_id TEXT NOT NULL,
        last_offset BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (topic, consumer_id)
    )
    "#,
];

/// Postgres-backed persistent queue.
///
/// Inherent methods are async. The [`PersistentQueue`] impl bridges them
/// with `Handle::block_on`, so it must be called from a thread that is
/// allowed to block inside a tokio runtime (the scheduler runs jobs on the
/// blocking pool).
#[derive(Clone)]
pub struct PostgresPersistentQueue {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
}

impl PostgresPersistentQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: Arc::new(pool),
            clock,
        }
    }

    /// Create the queue tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, event), fields(topic = %topic), err)]
    pub async fn append_event(
        &self,
        topic: &Topic,
        event: WorkspaceEvent,
    ) -> Result<Offset, QueueError> {
        let now = self.clock.now();
        let mut tx = self.begin_topic("append").await?;
        lock_topic(&mut tx, topic).await?;
        let offset = insert_entry(&mut tx, topic, None, &event, now).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_append", e))?;
        Ok(offset)
    }

    /// Append pre-keyed events; entries whose key is already claimed for
    /// `topic` are skipped.
    #[instrument(
        skip(self, events),
        fields(topic = %topic, event_count = events.len(), appended),
        err
    )]
    pub async fn append_keyed(
        &self,
        topic: &Topic,
        events: Vec<(DedupKey, WorkspaceEvent)>,
    ) -> Result<usize, QueueError> {
        if events.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let mut tx = self.begin_topic("append_batch").await?;
        lock_topic(&mut tx, topic).await?;

        let mut appended = 0;
        for (key, event) in events {
            let claimed = sqlx::query(
                r#"
                INSERT INTO persistent_queue_dedup (topic, dedup_key, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (topic, dedup_key) DO NOTHING
                "#,
            )
            .bind(topic.as_str())
            .bind(key.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_dedup", e))?
            .rows_affected();

            if claimed == 0 {
                continue;
            }
            insert_entry(&mut tx, topic, Some(&key), &event, now).await?;
            appended += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_append_batch", e))?;

        Span::current().record("appended", appended);
        Ok(appended)
    }

    #[instrument(skip(self), fields(topic = %topic, consumer = %consumer, entry_count), err)]
    pub async fn poll_entries(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        sqlx::query(
            r#"
            INSERT INTO persistent_queue_consumers (topic, consumer_id, last_offset, updated_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (topic, consumer_id) DO NOTHING
            "#,
        )
        .bind(topic.as_str())
        .bind(consumer.as_str())
        .bind(self.clock.now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_consumer", e))?;

        let rows = sqlx::query(
            r#"
            SELECT e.offset_id, e.payload, e.appended_at
            FROM persistent_queue_events e
            JOIN persistent_queue_consumers c
                ON c.topic = e.topic AND c.consumer_id = $2
            WHERE e.topic = $1 AND e.offset_id > c.last_offset
            ORDER BY e.offset_id ASC
            "#,
        )
        .bind(topic.as_str())
        .bind(consumer.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("poll", e))?;

        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("entry_count", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self), fields(topic = %topic, consumer = %consumer), err)]
    pub async fn acknowledge_offset(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
        upto: Offset,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO persistent_queue_consumers (topic, consumer_id, last_offset, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (topic, consumer_id)
            DO UPDATE SET
                last_offset = GREATEST(persistent_queue_consumers.last_offset, EXCLUDED.last_offset),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(topic.as_str())
        .bind(consumer.as_str())
        .bind(to_db_offset(upto)?)
        .bind(self.clock.now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acknowledge", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(topic = %topic), err)]
    pub async fn load_topic(&self, topic: &Topic) -> Result<Vec<QueueEntry>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT offset_id, payload, appended_at
            FROM persistent_queue_events
            WHERE topic = $1
            ORDER BY offset_id ASC
            "#,
        )
        .bind(topic.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_all", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(deleted), err)]
    pub async fn delete_entries_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let deleted = sqlx::query("DELETE FROM persistent_queue_events WHERE appended_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_older_than", e))?
            .rows_affected();
        Span::current().record("deleted", deleted);
        Ok(deleted)
    }

    async fn begin_topic(
        &self,
        operation: &'static str,
    ) -> Result<Transaction<'static, Postgres>, QueueError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            QueueError::Runtime(
                "PostgresPersistentQueue must be called from within a tokio runtime".to_string(),
            )
        })?;
        handle.block_on(fut)
    }
}

async fn lock_topic(tx: &mut Transaction<'_, Postgres>, topic: &Topic) -> Result<(), QueueError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(topic.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_topic", e))?;
    Ok(())
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    topic: &Topic,
    dedup_key: Option<&DedupKey>,
    event: &WorkspaceEvent,
    appended_at: DateTime<Utc>,
) -> Result<Offset, QueueError> {
    let row = sqlx::query(
        r#"
        INSERT INTO persistent_queue_events (topic, dedup_key, payload, appended_at)
        VALUES ($1, $2, $3, $4)
        RETURNING offset_id
        "#,
    )
    .bind(topic.as_str())
    .bind(dedup_key.map(DedupKey::as_str))
    .bind(Json(event))
    .bind(appended_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;

    let offset: i64 = row
        .try_get("offset_id")
        .map_err(|e| map_sqlx_error("insert_entry", e))?;
    from_db_offset(offset)
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<QueueEntry, QueueError> {
    let offset: i64 = row
        .try_get("offset_id")
        .map_err(|e| map_sqlx_error("decode_entry", e))?;
    let Json(payload): Json<WorkspaceEvent> = row
        .try_get("payload")
        .map_err(|e| map_sqlx_error("decode_entry", e))?;
    let appended_at: DateTime<Utc> = row
        .try_get("appended_at")
        .map_err(|e| map_sqlx_error("decode_entry", e))?;

    Ok(QueueEntry {
        offset: from_db_offset(offset)?,
        payload,
        appended_at,
    })
}

fn to_db_offset(offset: Offset) -> Result<i64, QueueError> {
    i64::try_from(offset).map_err(|_| QueueError::storage("offset", format!("{offset} overflows BIGINT")))
}

fn from_db_offset(offset: i64) -> Result<Offset, QueueError> {
    Offset::try_from(offset).map_err(|_| QueueError::storage("offset", format!("negative offset {offset}")))
}

/// Map SQLx errors to QueueError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            QueueError::storage(
                operation,
                format!("database error {code}: {}", db_err.message()),
            )
        }
        sqlx::Error::PoolClosed => QueueError::storage(operation, "connection pool closed"),
        other => QueueError::storage(operation, other.to_string()),
    }
}

impl PersistentQueue for PostgresPersistentQueue {
    fn append(&self, topic: &Topic, event: WorkspaceEvent) -> Result<Offset, QueueError> {
        self.block_on(self.append_event(topic, event))
    }

    fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<WorkspaceEvent>,
        dedup_key: &dyn Fn(&WorkspaceEvent) -> DedupKey,
    ) -> Result<usize, QueueError> {
        let keyed = events.into_iter().map(|e| (dedup_key(&e), e)).collect();
        self.block_on(self.append_keyed(topic, keyed))
    }

    fn poll(&self, topic: &Topic, consumer: &ConsumerId) -> Result<Vec<QueueEntry>, QueueError> {
        self.block_on(self.poll_entries(topic, consumer))
    }

    fn acknowledge(
        &self,
        topic: &Topic,
        consumer: &ConsumerId,
        upto: Offset,
    ) -> Result<(), QueueError> {
        self.block_on(self.acknowledge_offset(topic, consumer, upto))
    }

    fn find_all(&self, topic: &Topic) -> Result<Vec<QueueEntry>, QueueError> {
        self.block_on(self.load_topic(topic))
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        self.block_on(self.delete_entries_older_than(cutoff))
    }
}

#[async_trait::async_trait]
impl QueueInspection for PostgresPersistentQueue {
    async fn topic_stats(&self, topic: &Topic) -> Result<TopicStats, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS entries, COALESCE(MAX(offset_id), 0) AS head
            FROM persistent_queue_events
            WHERE topic = $1
            "#,
        )
        .bind(topic.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("topic_stats", e))?;

        let entries: i64 = row
            .try_get("entries")
            .map_err(|e| map_sqlx_error("topic_stats", e))?;
        let head: i64 = row
            .try_get("head")
            .map_err(|e| map_sqlx_error("topic_stats", e))?;

        let cursor_rows = sqlx::query(
            r#"
            SELECT c.consumer_id, c.last_offset,
                (SELECT COUNT(*) FROM persistent_queue_events e
                  WHERE e.topic = c.topic AND e.offset_id > c.last_offset) AS pending
            FROM persistent_queue_consumers c
            WHERE c.topic = $1
            ORDER BY c.consumer_id
            "#,
        )
        .bind(topic.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("topic_stats", e))?;

        let mut consumers = Vec::with_capacity(cursor_rows.len());
        for row in cursor_rows {
            let consumer: String = row
                .try_get("consumer_id")
                .map_err(|e| map_sqlx_error("topic_stats", e))?;
            let last: i64 = row
                .try_get("last_offset")
                .map_err(|e| map_sqlx_error("topic_stats", e))?;
            let pending: i64 = row
                .try_get("pending")
                .map_err(|e| map_sqlx_error("topic_stats", e))?;
            consumers.push(ConsumerLag {
                consumer: ConsumerId::new(consumer),
                last_acknowledged: from_db_offset(last)?,
                pending: pending.max(0) as u64,
            });
        }

        Ok(TopicStats {
            topic: topic.clone(),
            entries: entries.max(0) as u64,
            head: from_db_offset(head)?,
            consumers,
        })
    }

    async fn topics(&self) -> Result<Vec<Topic>, QueueError> {
        let rows = sqlx::query("SELECT DISTINCT topic FROM persistent_queue_events ORDER BY topic")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("topics", e))?;
        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("topic")
                    .map(Topic::new)
                    .map_err(|e| map_sqlx_error("topics", e))
            })
            .collect()
    }
}
