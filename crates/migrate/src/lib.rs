//! Schema migrations for PostgreSQL-backed stores.
//!
//! A [`MigrationManager`] owns an ordered list of [`Migration`]s and a
//! tracking table. `migrate` validates the recorded progress against the list
//! and applies whatever is missing, one transaction per migration.

pub mod error;
pub mod manager;
pub mod migration;

pub use error::{MigrationError, Result};
pub use manager::{
    AppliedMigration, AppliedStep, DEFAULT_TABLE_NAME, MigrationManager, MigrationManagerBuilder,
    MigrationReport,
};
pub use migration::{FnMigration, Migration, MigrationAction, RawMigration, checksum_hex};
