use async_trait::async_trait;

use crate::{
    AggregateId, Event, EventIterator, EventPages, EventStoreError, GlobalVersion, Result,
    Snapshot, Version,
};

/// Core trait for event log implementations.
///
/// All implementations must be thread-safe (Send + Sync); every call works on
/// its own transaction or cursor.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate.
    ///
    /// The batch is written atomically. The first event must carry the
    /// aggregate's next version, otherwise the call fails with
    /// `ConcurrencyConflict` and nothing is written. On success each event's
    /// `global_version` is set to the position the store assigned it.
    ///
    /// An empty batch is a no-op.
    async fn save(&self, events: &mut [Event]) -> Result<()>;

    /// Returns the aggregate's events with a version above `after_version`,
    /// oldest first.
    fn get(&self, id: &AggregateId, aggregate_type: &str, after_version: Version)
    -> EventIterator;

    /// Returns a factory for up to `count` events of the global log, starting
    /// at `start` (inclusive), in global order.
    fn all(&self, start: GlobalVersion, count: u64) -> EventPages;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn save_event(&self, event: &mut Event) -> Result<()> {
        self.save(std::slice::from_mut(event)).await
    }

    /// Reads the aggregate's events after `after_version` into memory.
    async fn events_for(
        &self,
        id: &AggregateId,
        aggregate_type: &str,
        after_version: Version,
    ) -> Result<Vec<Event>> {
        self.get(id, aggregate_type, after_version)
            .collect_all()
            .await
    }

    /// Returns the aggregate's latest stored version, or `Version::initial()`.
    async fn current_version(&self, id: &AggregateId, aggregate_type: &str) -> Result<Version> {
        let events = self
            .events_for(id, aggregate_type, Version::initial())
            .await?;
        Ok(events.last().map(|e| e.version).unwrap_or_default())
    }

    /// Reads the global log from `start` to the end, `page_size` events per
    /// query.
    async fn read_all(&self, start: GlobalVersion, page_size: u64) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let mut start = start;

        loop {
            let page = self.all(start, page_size).open().collect_all().await?;
            let Some(last) = page.last() else {
                break;
            };
            start = last.global_version.next();

            let full = page.len() as u64 == page_size;
            events.extend(page);
            if !full {
                break;
            }
        }

        Ok(events)
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Core trait for snapshot store implementations.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores the snapshot, replacing any previous one for the aggregate.
    ///
    /// Last writer wins; there is no version check.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Retrieves the snapshot for an aggregate.
    ///
    /// Fails with `SnapshotNotFound` if none has been saved.
    async fn get(&self, id: &AggregateId, aggregate_type: &str) -> Result<Snapshot>;
}

/// Validates a batch before it is appended.
///
/// All events must share the first event's aggregate, and their versions must
/// be consecutive.
pub fn validate_batch(events: &[Event]) -> Result<()> {
    let Some(first) = events.first() else {
        return Ok(());
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidBatch(
                "All events must be for the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidBatch(
                "All events must have the same aggregate type".to_string(),
            ));
        }

        expected_version = expected_version.checked_next().ok_or_else(|| {
            EventStoreError::InvalidBatch(format!(
                "Event version {expected_version} has no successor"
            ))
        })?;
        if event.version != expected_version {
            return Err(EventStoreError::InvalidBatch(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, aggregate_type: &str, version: i64) -> Event {
        Event::new(id, aggregate_type, Version::new(version), "Changed")
    }

    #[test]
    fn empty_and_single_batches_are_valid() {
        assert!(validate_batch(&[]).is_ok());
        assert!(validate_batch(&[event("a", "A", 4)]).is_ok());
    }

    #[test]
    fn consecutive_batch_is_valid() {
        let batch = [event("a", "A", 1), event("a", "A", 2), event("a", "A", 3)];
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn mixed_aggregates_are_rejected() {
        let batch = [event("a", "A", 1), event("b", "A", 2)];
        assert!(matches!(
            validate_batch(&batch),
            Err(EventStoreError::InvalidBatch(_))
        ));

        let batch = [event("a", "A", 1), event("a", "B", 2)];
        assert!(matches!(
            validate_batch(&batch),
            Err(EventStoreError::InvalidBatch(_))
        ));
    }

    #[test]
    fn batch_past_the_last_version_is_rejected() {
        let batch = [event("a", "A", i64::MAX), event("a", "A", 1)];
        assert!(matches!(
            validate_batch(&batch),
            Err(EventStoreError::InvalidBatch(_))
        ));
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let gap = [event("a", "A", 1), event("a", "A", 3)];
        assert!(validate_batch(&gap).is_err());

        let duplicate = [event("a", "A", 1), event("a", "A", 1)];
        assert!(validate_batch(&duplicate).is_err());
    }
}
