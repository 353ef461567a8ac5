use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EntityId, EventEnvelope, EventId, EventQuery, EventStoreError, Offset, Result, Snapshot,
    Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// Advisory lock key taken by every append transaction.
///
/// `BIGSERIAL` values are handed out before commit, so two concurrent
/// writers could commit offsets out of order and a tag reader could skip
/// the lower one. Serializing appends keeps commit order equal to offset
/// order.
const APPEND_LOCK_KEY: i64 = 0x6772_6565_7469_6e67;

const EVENT_COLUMNS: &str = "offset_seq, id, event_type, entity_id, entity_type, tags, version, timestamp, payload, metadata";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            entity_id: EntityId::new(row.try_get::<String, _>("entity_id")?),
            entity_type: row.try_get("entity_type")?,
            tags: row.try_get("tags")?,
            version: Version::new(row.try_get("version")?),
            offset: Offset::new(row.try_get("offset_seq")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let entity_id = events[0].entity_id.clone();

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        if let Some(expected) = options.expected_version {
            let current_version: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE entity_id = $1")
                    .bind(entity_id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Version::new(current_version.unwrap_or(0));

            if actual != expected {
                return Err(EventStoreError::ConcurrencyConflict {
                    entity_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::initial();
        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, entity_id, entity_type, tags, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.entity_id.as_str())
            .bind(&event.entity_type)
            .bind(&event.tags)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_entity_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        entity_id: entity_id.clone(),
                        expected: options.expected_version.unwrap_or(Version::initial()),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        tx.commit().await?;

        tracing::debug!(%entity_id, version = %last_version, count = events.len(), "events appended");
        metrics::counter!("event_store_events_appended_total").increment(events.len() as u64);

        Ok(last_version)
    }

    async fn get_events_for_entity(&self, entity_id: &EntityId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE entity_id = $1 ORDER BY version ASC"
        ))
        .bind(entity_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_events_for_entity_from_version(
        &self,
        entity_id: &EntityId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE entity_id = $1 AND version >= $2 ORDER BY version ASC"
        ))
        .bind(entity_id.as_str())
        .bind(from_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
        let mut param_count = 0;

        if query.entity_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND entity_id = ${param_count}"));
        }
        if query.tag.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND ${param_count} = ANY(tags)"));
        }
        if query.from_offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND offset_seq >= ${param_count}"));
        }

        sql.push_str(" ORDER BY offset_seq ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.entity_id {
            sqlx_query = sqlx_query.bind(id.into_inner());
        }
        if let Some(tag) = query.tag {
            sqlx_query = sqlx_query.bind(tag);
        }
        if let Some(from_offset) = query.from_offset {
            sqlx_query = sqlx_query.bind(from_offset.as_i64());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_entity_version(&self, entity_id: &EntityId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE entity_id = $1")
                .bind(entity_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (entity_id, entity_type, version, timestamp, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_id) DO UPDATE SET
                entity_type = EXCLUDED.entity_type,
                version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.entity_id.as_str())
        .bind(&snapshot.entity_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.timestamp)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, entity_id: &EntityId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT entity_id, entity_type, version, timestamp, state
            FROM snapshots
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                entity_id: EntityId::new(row.try_get::<String, _>("entity_id")?),
                entity_type: row.try_get("entity_type")?,
                version: Version::new(row.try_get("version")?),
                timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
