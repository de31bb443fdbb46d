//! Built-in schema migrations for the `events` and `snapshots` tables.
//!
//! Each store tracks its migrations in its own table so the two lists are
//! validated independently.

use futures_util::future::BoxFuture;
use migrate::{FnMigration, Migration, MigrationManager, RawMigration};
use sqlx::PgConnection;

use crate::{Result, StoreConfig};

/// Tracking table for the event store's migrations.
pub const EVENT_STORE_MIGRATION_TABLE: &str = "event_store_migrations";

/// Tracking table for the snapshot store's migrations.
pub const SNAPSHOT_STORE_MIGRATION_TABLE: &str = "snapshot_store_migrations";

/// Name of the unique index backing per-aggregate version ordering.
pub const UNIQUE_VERSION_INDEX: &str = "events_id_type_version";

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE events (
    seq BIGSERIAL PRIMARY KEY,
    id VARCHAR NOT NULL,
    version BIGINT NOT NULL,
    reason VARCHAR NOT NULL,
    aggregate_type VARCHAR NOT NULL,
    timestamp VARCHAR NOT NULL,
    data BYTEA,
    metadata BYTEA
)
"#;

const CREATE_EVENT_INDICES: &str = r#"
CREATE UNIQUE INDEX events_id_type_version ON events (id, aggregate_type, version);
CREATE INDEX events_id_type ON events (id, aggregate_type);
"#;

const CREATE_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    id VARCHAR NOT NULL,
    aggregate_type VARCHAR NOT NULL,
    version BIGINT NOT NULL,
    global_version BIGINT NOT NULL,
    state BYTEA,
    PRIMARY KEY (id, aggregate_type)
);
"#;

fn create_events_table(conn: &mut PgConnection) -> BoxFuture<'_, sqlx::Result<()>> {
    Box::pin(async move {
        sqlx::query(CREATE_EVENTS_TABLE).execute(conn).await?;
        Ok(())
    })
}

/// The event store's migrations, in order. Never reorder or edit entries;
/// append new ones.
pub fn event_store_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(FnMigration::new("create events table", create_events_table)),
        Box::new(RawMigration::new("create indices", CREATE_EVENT_INDICES)),
    ]
}

/// The snapshot store's migrations, in order.
pub fn snapshot_store_migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(RawMigration::new(
        "create snapshots table",
        CREATE_SNAPSHOTS_TABLE,
    ))]
}

/// Builds a migration manager for a store, honouring the configured table
/// name and logger.
pub(crate) fn migration_manager(
    config: &StoreConfig,
    default_table: &str,
    migrations: Vec<Box<dyn Migration>>,
) -> Result<MigrationManager> {
    let table = config.migration_table.as_deref().unwrap_or(default_table);
    Ok(MigrationManager::builder()
        .table_name(table)
        .logger(config.logger.clone())
        .migrations(migrations)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_store_migration_names_are_stable() {
        let names: Vec<String> = event_store_migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, ["create events table", "create indices"]);
    }

    #[test]
    fn unique_index_is_created_by_migrations() {
        assert!(CREATE_EVENT_INDICES.contains(UNIQUE_VERSION_INDEX));
    }

    #[test]
    fn manager_uses_default_table() {
        let manager = migration_manager(
            &StoreConfig::default(),
            EVENT_STORE_MIGRATION_TABLE,
            event_store_migrations(),
        )
        .unwrap();
        assert_eq!(manager.table_name(), EVENT_STORE_MIGRATION_TABLE);
        assert_eq!(manager.migrations().len(), 2);
    }

    #[test]
    fn manager_honours_configured_table() {
        let config = StoreConfig::default().with_migration_table("snapshots_evolution");
        let manager = migration_manager(
            &config,
            SNAPSHOT_STORE_MIGRATION_TABLE,
            snapshot_store_migrations(),
        )
        .unwrap();
        assert_eq!(manager.table_name(), "snapshots_evolution");
    }

    #[test]
    fn invalid_configured_table_is_rejected() {
        let config = StoreConfig::default().with_migration_table("bad name");
        let result = migration_manager(&config, EVENT_STORE_MIGRATION_TABLE, Vec::new());
        assert!(matches!(
            result,
            Err(crate::EventStoreError::Migration(
                migrate::MigrationError::InvalidTableName(_)
            ))
        ));
    }
}
