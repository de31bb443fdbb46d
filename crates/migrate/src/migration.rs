use async_trait::async_trait;
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;

/// A single, ordered schema evolution step.
///
/// Implementations run inside the transaction that also records them, so an
/// action and its tracking row commit or roll back together.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Human-readable name, stored in the tracking table.
    fn name(&self) -> &str;

    /// Stable fingerprint of the migration definition.
    ///
    /// Compared against the recorded checksum on every run so that editing an
    /// applied migration is detected instead of silently ignored.
    fn checksum(&self) -> String;

    /// Runs the migration against the open transaction.
    async fn run(&self, conn: &mut PgConnection) -> sqlx::Result<()>;
}

impl std::fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name())
            .field("checksum", &self.checksum())
            .finish()
    }
}

/// Hex-encoded SHA-256 over the given parts, separated by NUL bytes.
pub fn checksum_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Migration that executes a block of SQL text.
///
/// The text may hold several statements; it is sent with the simple query
/// protocol.
#[derive(Debug, Clone)]
pub struct RawMigration {
    name: String,
    sql: String,
}

impl RawMigration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[async_trait]
impl Migration for RawMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> String {
        checksum_hex(&[&self.name, &self.sql])
    }

    async fn run(&self, conn: &mut PgConnection) -> sqlx::Result<()> {
        sqlx::Executor::execute(conn, self.sql.as_str()).await?;
        Ok(())
    }
}

/// Signature of a code migration.
pub type MigrationAction = for<'c> fn(&'c mut PgConnection) -> BoxFuture<'c, sqlx::Result<()>>;

/// Migration backed by a function.
///
/// Code cannot be fingerprinted, so the checksum covers the name only; rename
/// the migration when its behaviour changes.
#[derive(Clone)]
pub struct FnMigration {
    name: String,
    action: MigrationAction,
}

impl FnMigration {
    pub fn new(name: impl Into<String>, action: MigrationAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> String {
        checksum_hex(&[&self.name])
    }

    async fn run(&self, conn: &mut PgConnection) -> sqlx::Result<()> {
        (self.action)(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_conn: &mut PgConnection) -> BoxFuture<'_, sqlx::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn checksum_is_hex_sha256() {
        let sum = checksum_hex(&["create events table"]);
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sum, checksum_hex(&["create events table"]));
    }

    #[test]
    fn checksum_separates_parts() {
        assert_ne!(checksum_hex(&["ab", "c"]), checksum_hex(&["a", "bc"]));
    }

    #[test]
    fn raw_migration_checksum_tracks_sql() {
        let a = RawMigration::new("create indices", "CREATE INDEX a ON t (x);");
        let b = RawMigration::new("create indices", "CREATE INDEX b ON t (y);");
        assert_eq!(a.name(), "create indices");
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn fn_migration_checksum_tracks_name_only() {
        let a = FnMigration::new("create events table", noop);
        let b = FnMigration::new("create events table", noop);
        let c = FnMigration::new("create snapshots table", noop);
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
    }
}
