use async_trait::async_trait;
use futures_util::TryStreamExt;
use migrate::MigrationReport;
use serde_json::json;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::codec::{self, event_columns};
use crate::schema::{self, UNIQUE_VERSION_INDEX};
use crate::{
    AggregateId, Event, EventIterator, EventPages, EventStoreError, GlobalVersion, Result,
    Snapshot, StoreConfig, Version,
    store::{EventStore, SnapshotStore, validate_batch},
};

const SELECT_CURRENT_VERSION: &str =
    "SELECT version FROM events WHERE id = $1 AND aggregate_type = $2 ORDER BY version DESC LIMIT 1";

const INSERT_EVENT: &str = r#"
    INSERT INTO events (id, version, reason, aggregate_type, timestamp, data, metadata)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    RETURNING seq
"#;

const SELECT_AGGREGATE_EVENTS: &str = concat!(
    "SELECT ",
    event_columns!(),
    " FROM events WHERE id = $1 AND aggregate_type = $2 AND version > $3 ORDER BY version"
);

const SELECT_GLOBAL_PAGE: &str = concat!(
    "SELECT ",
    event_columns!(),
    " FROM events WHERE seq >= $1 ORDER BY seq LIMIT $2"
);

/// Opens a lazy cursor for `query`. The query runs on the first `advance`.
fn cursor(pool: PgPool, query: Query<'static, Postgres, PgArguments>) -> EventIterator {
    let stream = async_stream::stream! {
        let mut rows = query.fetch(&pool);
        loop {
            match rows.try_next().await {
                Ok(Some(row)) => yield codec::decode_event(&row).map_err(EventStoreError::from),
                Ok(None) => break,
                Err(err) => {
                    yield Err(EventStoreError::from(err));
                    break;
                }
            }
        }
    };
    EventIterator::new(Box::pin(stream))
}

async fn rollback(tx: Transaction<'_, Postgres>, config: &StoreConfig) {
    if let Err(err) = tx.rollback().await {
        config.logger.log(
            "could not rollback transaction",
            &json!({ "error": err.to_string() }),
        );
    }
}

/// PostgreSQL-backed event log.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store with default options.
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, StoreConfig::default())
    }

    /// Creates a new PostgreSQL event store.
    pub fn with_config(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Brings the `events` table to the current schema.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let manager = schema::migration_manager(
            &self.config,
            schema::EVENT_STORE_MIGRATION_TABLE,
            schema::event_store_migrations(),
        )?;
        Ok(manager.migrate(&self.pool).await?)
    }

    /// Runs the optimistic check and the inserts on an open transaction.
    ///
    /// Returns the sequence number assigned to each event, in batch order.
    async fn append(conn: &mut PgConnection, events: &[Event]) -> Result<Vec<GlobalVersion>> {
        let aggregate_id = events[0].aggregate_id.clone();
        let aggregate_type = events[0].aggregate_type.clone();
        let expected = events[0].version;

        let current: Option<i64> = sqlx::query_scalar(SELECT_CURRENT_VERSION)
            .bind(aggregate_id.as_str())
            .bind(&aggregate_type)
            .fetch_optional(&mut *conn)
            .await?;
        let actual = Version::new(current.unwrap_or(0));

        if actual.checked_next() != Some(expected) {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                aggregate_type,
                expected,
                actual,
            });
        }

        let mut assigned = Vec::with_capacity(events.len());
        for event in events {
            let inserted: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(INSERT_EVENT)
                .bind(event.aggregate_id.as_str())
                .bind(event.version.as_i64())
                .bind(&event.reason)
                .bind(&event.aggregate_type)
                .bind(codec::encode_timestamp(&event.timestamp))
                .bind(&event.data)
                .bind(&event.metadata)
                .fetch_one(&mut *conn)
                .await;

            match inserted {
                Ok(seq) => assigned.push(GlobalVersion::new(seq)),
                // A concurrent writer committed the same version after our check
                Err(sqlx::Error::Database(db_err))
                    if db_err.constraint() == Some(UNIQUE_VERSION_INDEX)
                        || db_err.is_unique_violation() =>
                {
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        aggregate_type,
                        expected,
                        actual,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(assigned)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn save(&self, events: &mut [Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(events)?;

        let _guard = match &self.config.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let assigned = match Self::append(&mut tx, events).await {
            Ok(assigned) => assigned,
            Err(err) => {
                rollback(tx, &self.config).await;
                if let EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual,
                    ..
                } = &err
                {
                    metrics::counter!("event_store_concurrency_conflicts").increment(1);
                    tracing::warn!(%aggregate_id, %expected, %actual, "concurrency conflict");
                }
                return Err(err);
            }
        };

        tx.commit().await?;

        // Only committed events carry a global version
        for (event, global_version) in events.iter_mut().zip(assigned) {
            event.global_version = global_version;
        }
        metrics::counter!("event_store_events_appended").increment(events.len() as u64);

        Ok(())
    }

    fn get(
        &self,
        id: &AggregateId,
        aggregate_type: &str,
        after_version: Version,
    ) -> EventIterator {
        let query = sqlx::query(SELECT_AGGREGATE_EVENTS)
            .bind(id.as_str().to_owned())
            .bind(aggregate_type.to_owned())
            .bind(after_version.as_i64());
        cursor(self.pool.clone(), query)
    }

    fn all(&self, start: GlobalVersion, count: u64) -> EventPages {
        let pool = self.pool.clone();
        let limit = i64::try_from(count).unwrap_or(i64::MAX);

        EventPages::new(move || {
            let query = sqlx::query(SELECT_GLOBAL_PAGE)
                .bind(start.as_i64())
                .bind(limit);
            cursor(pool.clone(), query)
        })
    }
}

/// PostgreSQL-backed snapshot store.
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, StoreConfig::default())
    }

    pub fn with_config(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Brings the `snapshots` table to the current schema.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let manager = schema::migration_manager(
            &self.config,
            schema::SNAPSHOT_STORE_MIGRATION_TABLE,
            schema::snapshot_store_migrations(),
        )?;
        Ok(manager.migrate(&self.pool).await?)
    }

    async fn upsert(conn: &mut PgConnection, snapshot: &Snapshot) -> Result<()> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM snapshots WHERE id = $1 AND aggregate_type = $2 LIMIT 1",
        )
        .bind(snapshot.id.as_str())
        .bind(&snapshot.aggregate_type)
        .fetch_optional(&mut *conn)
        .await?;

        if existing.is_none() {
            // A racing first save for the same key still resolves to last-writer-wins
            sqlx::query(
                r#"
                INSERT INTO snapshots (id, aggregate_type, version, global_version, state)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id, aggregate_type) DO UPDATE SET
                    version = EXCLUDED.version,
                    global_version = EXCLUDED.global_version,
                    state = EXCLUDED.state
                "#,
            )
            .bind(snapshot.id.as_str())
            .bind(&snapshot.aggregate_type)
            .bind(snapshot.version.as_i64())
            .bind(snapshot.global_version.as_i64())
            .bind(&snapshot.state)
            .execute(&mut *conn)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE snapshots SET state = $1, version = $2, global_version = $3
                WHERE id = $4 AND aggregate_type = $5
                "#,
            )
            .bind(&snapshot.state)
            .bind(snapshot.version.as_i64())
            .bind(snapshot.global_version.as_i64())
            .bind(snapshot.id.as_str())
            .bind(&snapshot.aggregate_type)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    #[tracing::instrument(
        skip(self, snapshot),
        fields(id = %snapshot.id, version = %snapshot.version)
    )]
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Err(err) = Self::upsert(&mut tx, snapshot).await {
            rollback(tx, &self.config).await;
            return Err(err);
        }

        tx.commit().await?;
        metrics::counter!("snapshot_store_saves").increment(1);

        Ok(())
    }

    async fn get(&self, id: &AggregateId, aggregate_type: &str) -> Result<Snapshot> {
        let row = sqlx::query(
            "SELECT version, global_version, state FROM snapshots WHERE id = $1 AND aggregate_type = $2",
        )
        .bind(id.as_str())
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(codec::decode_snapshot(&row, id, aggregate_type)?),
            None => Err(EventStoreError::SnapshotNotFound {
                id: id.clone(),
                aggregate_type: aggregate_type.to_string(),
            }),
        }
    }
}
