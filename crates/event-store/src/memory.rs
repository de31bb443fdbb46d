use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, Event, EventIterator, EventPages, EventStoreError, GlobalVersion, Result,
    Snapshot, StoreConfig, Version,
    store::{EventStore, SnapshotStore, validate_batch},
};

/// In-memory event store implementation for testing.
///
/// This implementation stores all events in memory and provides
/// the same interface as the PostgreSQL implementation. An event's global
/// version is its position in the log, starting at 1.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<Event>>>,
    config: StoreConfig,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            events: Arc::default(),
            config,
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, events: &mut [Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(events)?;

        let _guard = match &self.config.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let first = &events[0];
        let mut store = self.events.write().await;

        // Get current version for this aggregate
        let actual = store
            .iter()
            .filter(|e| {
                e.aggregate_id == first.aggregate_id && e.aggregate_type == first.aggregate_type
            })
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if actual.checked_next() != Some(first.version) {
            metrics::counter!("event_store_concurrency_conflicts").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: first.aggregate_id.clone(),
                aggregate_type: first.aggregate_type.clone(),
                expected: first.version,
                actual,
            });
        }

        for event in events.iter_mut() {
            event.global_version = GlobalVersion::new(store.len() as i64 + 1);
            store.push(event.clone());
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
        let store = self.events.clone();
        let id = id.clone();
        let aggregate_type = aggregate_type.to_string();

        let stream = async_stream::stream! {
            let mut matching: Vec<Event> = {
                let store = store.read().await;
                store
                    .iter()
                    .filter(|e| {
                        e.aggregate_id == id
                            && e.aggregate_type == aggregate_type
                            && e.version > after_version
                    })
                    .cloned()
                    .collect()
            };
            matching.sort_by_key(|e| e.version);

            for event in matching {
                yield Ok::<Event, EventStoreError>(event);
            }
        };
        EventIterator::new(Box::pin(stream))
    }

    fn all(&self, start: GlobalVersion, count: u64) -> EventPages {
        let store = self.events.clone();
        let count = usize::try_from(count).unwrap_or(usize::MAX);

        EventPages::new(move || {
            let store = store.clone();
            let stream = async_stream::stream! {
                let page: Vec<Event> = {
                    let store = store.read().await;
                    store
                        .iter()
                        .filter(|e| e.global_version >= start)
                        .take(count)
                        .cloned()
                        .collect()
                };

                for event in page {
                    yield Ok::<Event, EventStoreError>(event);
                }
            };
            EventIterator::new(Box::pin(stream))
        })
    }
}

/// In-memory snapshot store implementation for testing.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<(AggregateId, String), Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of aggregates with a snapshot.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let key = (snapshot.id.clone(), snapshot.aggregate_type.clone());
        self.snapshots.write().await.insert(key, snapshot.clone());
        metrics::counter!("snapshot_store_saves").increment(1);
        Ok(())
    }

    async fn get(&self, id: &AggregateId, aggregate_type: &str) -> Result<Snapshot> {
        let key = (id.clone(), aggregate_type.to_string());
        self.snapshots
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| EventStoreError::SnapshotNotFound {
                id: id.clone(),
                aggregate_type: aggregate_type.to_string(),
            })
    }
}
