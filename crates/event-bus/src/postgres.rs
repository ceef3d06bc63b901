use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{EventId, EventLog, EventLogEntry, Result};

/// PostgreSQL-backed event log.
///
/// Relies on the `event_log` table from the workspace migrations; the
/// primary key on `event_id` makes recording idempotent.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_entry(row: PgRow) -> Result<EventLogEntry> {
        Ok(EventLogEntry {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn record(&self, entry: EventLogEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO event_log (event_id, event_type, aggregate_id, payload, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(entry.event_id.as_uuid())
        .bind(&entry.event_type)
        .bind(&entry.aggregate_id)
        .bind(&entry.payload)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn entries_for(&self, aggregate_id: &str) -> Result<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_id, payload, timestamp
            FROM event_log
            WHERE aggregate_id = $1
            ORDER BY timestamp ASC, recorded_at ASC
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn entries_by_type(&self, event_type: &str) -> Result<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_id, payload, timestamp
            FROM event_log
            WHERE event_type = $1
            ORDER BY timestamp ASC, recorded_at ASC
            "#,
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
