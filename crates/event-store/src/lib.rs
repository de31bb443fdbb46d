//! Append-only event log and snapshot store backed by PostgreSQL.
//!
//! [`PostgresEventStore`] appends events per aggregate with optimistic
//! concurrency and reads them back through lazy [`EventIterator`] cursors.
//! [`PostgresSnapshotStore`] keeps the latest state of each aggregate. Both
//! create their tables through `migrate`. The in-memory stores implement the
//! same traits for tests.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod iterator;
pub mod memory;
pub mod postgres;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use common::{AggregateId, Logger};
pub use config::{DatabaseConfig, StoreConfig};
pub use error::{DecodeError, EventStoreError, Result};
pub use event::{Event, GlobalVersion, Version};
pub use iterator::{EventIterator, EventPages, EventStream};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use migrate::MigrationReport;
pub use postgres::{PostgresEventStore, PostgresSnapshotStore};
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt, SnapshotStore};
