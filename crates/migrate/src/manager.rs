use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::Logger;
use serde_json::json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{Migration, MigrationError, Result};

/// Tracking table used when none is configured.
pub const DEFAULT_TABLE_NAME: &str = "evolution";

const MAX_IDENTIFIER_LEN: usize = 63;

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Zero-based position of the migration in its defined list.
    pub sequence_id: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// A migration applied by one `migrate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub sequence_id: usize,
    pub name: String,
    pub took: Duration,
}

/// Outcome of a `migrate` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Migrations applied by this call, in order.
    pub applied: Vec<AppliedStep>,
    /// Number of migrations that were already applied.
    pub skipped: usize,
}

impl MigrationReport {
    /// True when the call found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Brings a database to the schema described by an ordered migration list.
///
/// Progress is kept in a tracking table holding one row per applied
/// migration. Rows are matched to migrations by position and validated by
/// name and checksum before anything new is applied. Each pending migration
/// runs in its own transaction together with the insert of its tracking row.
///
/// A single migrator per database is assumed; concurrent `migrate` calls
/// against the same tracking table are not coordinated.
pub struct MigrationManager {
    table_name: String,
    migrations: Vec<Box<dyn Migration>>,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("table_name", &self.table_name)
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MigrationManager`].
pub struct MigrationManagerBuilder {
    table_name: String,
    migrations: Vec<Box<dyn Migration>>,
    logger: Arc<dyn Logger>,
}

impl Default for MigrationManagerBuilder {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            migrations: Vec::new(),
            logger: common::default_logger(),
        }
    }
}

impl MigrationManagerBuilder {
    /// Sets the tracking table name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Appends one migration to the list.
    pub fn migration(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    /// Appends several migrations to the list, keeping their order.
    pub fn migrations(mut self, migrations: impl IntoIterator<Item = Box<dyn Migration>>) -> Self {
        self.migrations.extend(migrations);
        self
    }

    /// Builds the manager, validating the table name.
    pub fn build(self) -> Result<MigrationManager> {
        validate_table_name(&self.table_name)?;
        Ok(MigrationManager {
            table_name: self.table_name,
            migrations: self.migrations,
            logger: self.logger,
        })
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to PostgreSQL's identifier length.
fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(MigrationError::InvalidTableName(name.to_string()))
    }
}

impl MigrationManager {
    pub fn builder() -> MigrationManagerBuilder {
        MigrationManagerBuilder::default()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The defined migrations, in order.
    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Creates the tracking table if it does not exist yet.
    pub async fn ensure_tracking_table(&self, pool: &PgPool) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                sequence_id BIGINT NOT NULL PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table_name
        );
        sqlx::query(&sql).execute(pool).await?;
        Ok(())
    }

    /// Returns how many migrations have been applied.
    ///
    /// The count means "the first N migrations, in definition order".
    pub async fn count_applied(&self, pool: &PgPool) -> Result<usize> {
        self.ensure_tracking_table(pool).await?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.table_name);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Returns the tracking rows ordered by position.
    pub async fn applied(&self, pool: &PgPool) -> Result<Vec<AppliedMigration>> {
        self.ensure_tracking_table(pool).await?;
        let sql = format!(
            "SELECT sequence_id, name, checksum, applied_at FROM {} ORDER BY sequence_id",
            self.table_name
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;

        rows.into_iter()
            .map(|row| -> Result<AppliedMigration> {
                Ok(AppliedMigration {
                    sequence_id: row.try_get("sequence_id")?,
                    name: row.try_get("name")?,
                    checksum: row.try_get("checksum")?,
                    applied_at: row.try_get("applied_at")?,
                })
            })
            .collect()
    }

    /// Returns the migrations that have not been applied yet.
    ///
    /// Nothing is executed. Fails the same way `migrate` would if the recorded
    /// progress does not match the defined list.
    pub async fn pending(&self, pool: &PgPool) -> Result<&[Box<dyn Migration>]> {
        let applied = self.applied(pool).await?;
        self.check_applied(&applied)?;
        Ok(&self.migrations[applied.len()..])
    }

    /// Applies every pending migration, in order.
    ///
    /// Stops at the first failure; the failed migration is rolled back and not
    /// recorded, so calling `migrate` again retries it.
    #[tracing::instrument(skip(self, pool), fields(table = %self.table_name))]
    pub async fn migrate(&self, pool: &PgPool) -> Result<MigrationReport> {
        let applied = self.applied(pool).await?;
        self.check_applied(&applied)?;

        let missing = self.migrations.len() - applied.len();
        self.logger.log(
            "initiating the execution of missing database migrations",
            &json!({ "missing": missing }),
        );

        let mut report = MigrationReport {
            applied: Vec::with_capacity(missing),
            skipped: applied.len(),
        };

        for (sequence_id, migration) in self.migrations.iter().enumerate().skip(applied.len()) {
            let took = self
                .apply_migration(pool, sequence_id, migration.as_ref())
                .await?;
            report.applied.push(AppliedStep {
                sequence_id,
                name: migration.name().to_string(),
                took,
            });
        }

        tracing::info!(
            applied = report.applied.len(),
            skipped = report.skipped,
            "migrations complete"
        );

        Ok(report)
    }

    /// Verifies that the tracking rows are a prefix of the defined list.
    fn check_applied(&self, applied: &[AppliedMigration]) -> Result<()> {
        if applied.len() > self.migrations.len() {
            return Err(MigrationError::TooManyAppliedMigrations {
                applied: applied.len(),
                defined: self.migrations.len(),
            });
        }

        for (sequence_id, (record, migration)) in applied.iter().zip(&self.migrations).enumerate()
        {
            let in_place = usize::try_from(record.sequence_id).ok() == Some(sequence_id);
            if !in_place || record.name != migration.name() {
                return Err(MigrationError::MigrationMismatch {
                    sequence_id,
                    expected: migration.name().to_string(),
                    found: record.name.clone(),
                });
            }
            if record.checksum != migration.checksum() {
                return Err(MigrationError::ChecksumMismatch {
                    sequence_id,
                    name: record.name.clone(),
                });
            }
        }

        Ok(())
    }

    async fn apply_migration(
        &self,
        pool: &PgPool,
        sequence_id: usize,
        migration: &dyn Migration,
    ) -> Result<Duration> {
        let mut tx = pool.begin().await?;

        self.logger.log(
            "applying migration",
            &json!({ "sequence_id": sequence_id, "name": migration.name() }),
        );
        let start = Instant::now();

        if let Err(source) = migration.run(&mut tx).await {
            self.rollback(tx).await;
            return Err(MigrationError::Execution {
                sequence_id,
                name: migration.name().to_string(),
                source,
            });
        }

        let sql = format!(
            "INSERT INTO {} (sequence_id, name, checksum) VALUES ($1, $2, $3)",
            self.table_name
        );
        let recorded = sqlx::query(&sql)
            .bind(sequence_id as i64)
            .bind(migration.name())
            .bind(migration.checksum())
            .execute(&mut *tx)
            .await;
        if let Err(source) = recorded {
            self.rollback(tx).await;
            return Err(MigrationError::Tracking {
                sequence_id,
                source,
            });
        }

        tx.commit().await?;

        let took = start.elapsed();
        metrics::counter!("migrations_applied").increment(1);
        metrics::histogram!("migration_duration_seconds").record(took.as_secs_f64());
        self.logger.log(
            "applied migration",
            &json!({
                "sequence_id": sequence_id,
                "name": migration.name(),
                "took_ms": took.as_millis() as u64,
            }),
        );

        Ok(took)
    }

    async fn rollback(&self, tx: Transaction<'_, Postgres>) {
        if let Err(err) = tx.rollback().await {
            self.logger.log(
                "could not rollback transaction",
                &json!({ "error": err.to_string() }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;
    use sqlx::PgConnection;

    use super::*;
    use crate::{FnMigration, RawMigration};

    fn noop(_conn: &mut PgConnection) -> BoxFuture<'_, sqlx::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn manager() -> MigrationManager {
        MigrationManager::builder()
            .migration(FnMigration::new("create events table", noop))
            .migration(RawMigration::new(
                "create indices",
                "CREATE INDEX i ON events (id);",
            ))
            .build()
            .unwrap()
    }

    fn record(manager: &MigrationManager, sequence_id: usize) -> AppliedMigration {
        let migration = &manager.migrations()[sequence_id];
        AppliedMigration {
            sequence_id: sequence_id as i64,
            name: migration.name().to_string(),
            checksum: migration.checksum(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn builder_defaults_table_name() {
        let manager = MigrationManager::builder().build().unwrap();
        assert_eq!(manager.table_name(), DEFAULT_TABLE_NAME);
        assert!(manager.migrations().is_empty());
    }

    #[test]
    fn builder_rejects_unsafe_table_names() {
        let too_long = "x".repeat(64);
        for name in ["", "1abc", "evolution; DROP TABLE events", "a-b", too_long.as_str()] {
            let result = MigrationManager::builder().table_name(name).build();
            assert!(
                matches!(result, Err(MigrationError::InvalidTableName(_))),
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn builder_accepts_identifiers() {
        for name in ["evolution", "_private", "event_store_migrations", "T1"] {
            assert!(MigrationManager::builder().table_name(name).build().is_ok());
        }
    }

    #[test]
    fn check_applied_accepts_prefix() {
        let manager = manager();
        assert!(manager.check_applied(&[]).is_ok());
        assert!(manager.check_applied(&[record(&manager, 0)]).is_ok());
        assert!(
            manager
                .check_applied(&[record(&manager, 0), record(&manager, 1)])
                .is_ok()
        );
    }

    #[test]
    fn check_applied_rejects_too_many() {
        let manager = manager();
        let mut extra = record(&manager, 1);
        extra.sequence_id = 2;
        let result = manager.check_applied(&[record(&manager, 0), record(&manager, 1), extra]);

        assert!(matches!(
            result,
            Err(MigrationError::TooManyAppliedMigrations {
                applied: 3,
                defined: 2
            })
        ));
    }

    #[test]
    fn check_applied_rejects_renamed_migration() {
        let manager = manager();
        let mut renamed = record(&manager, 0);
        renamed.name = "create the events table".to_string();

        let result = manager.check_applied(&[renamed]);
        assert!(matches!(
            result,
            Err(MigrationError::MigrationMismatch { sequence_id: 0, .. })
        ));
    }

    #[test]
    fn check_applied_rejects_reordered_migrations() {
        let manager = manager();
        let mut first = record(&manager, 1);
        first.sequence_id = 0;
        let mut second = record(&manager, 0);
        second.sequence_id = 1;

        let result = manager.check_applied(&[first, second]);
        assert!(matches!(
            result,
            Err(MigrationError::MigrationMismatch { sequence_id: 0, .. })
        ));
    }

    #[test]
    fn check_applied_rejects_gap_in_sequence() {
        let manager = manager();
        let mut shifted = record(&manager, 0);
        shifted.sequence_id = 1;

        let result = manager.check_applied(&[shifted]);
        assert!(matches!(
            result,
            Err(MigrationError::MigrationMismatch { sequence_id: 0, .. })
        ));
    }

    #[test]
    fn check_applied_rejects_edited_migration() {
        let manager = manager();
        let mut edited = record(&manager, 1);
        edited.checksum = "0".repeat(64);

        let result = manager.check_applied(&[record(&manager, 0), edited]);
        assert!(matches!(
            result,
            Err(MigrationError::ChecksumMismatch { sequence_id: 1, .. })
        ));
    }

    #[test]
    fn report_noop() {
        assert!(MigrationReport::default().is_noop());
    }
}
