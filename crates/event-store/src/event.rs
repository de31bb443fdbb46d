use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::AggregateId;

/// Version number of an aggregate, used for optimistic concurrency control.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event on an aggregate. Version 0 means "no events yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version, saturating at `i64::MAX`.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the next version, or `None` if it would overflow.
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Store-wide position of an event.
///
/// Assigned by the store on insert; unique and strictly increasing across all
/// aggregates. 0 means "not persisted yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalVersion(i64);

impl GlobalVersion {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The position before any event; reading from here yields the whole log.
    pub fn start() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GlobalVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for GlobalVersion {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A domain event as persisted in the event log.
///
/// `data` and `metadata` are opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Cart", "Order").
    pub aggregate_type: String,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// Position in the global log. Set by the store when the event is saved.
    pub global_version: GlobalVersion,

    /// The kind of event (e.g., "ItemAdded").
    pub reason: String,

    /// When the event happened. Stored with second precision.
    pub timestamp: DateTime<Utc>,

    /// The serialized event payload.
    pub data: Vec<u8>,

    /// Serialized metadata about the event.
    pub metadata: Vec<u8>,
}

impl Event {
    /// Creates an unsaved event timestamped now, with empty data and metadata.
    pub fn new(
        aggregate_id: impl Into<AggregateId>,
        aggregate_type: impl Into<String>,
        version: Version,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            global_version: GlobalVersion::start(),
            reason: reason.into(),
            timestamp: Utc::now().trunc_subsecs(0),
            data: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets the payload from a serializable value, encoded as JSON.
    pub fn with_json_data<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.data = serde_json::to_vec(data)?;
        Ok(self)
    }

    /// Sets the metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Sets the timestamp, truncated to whole seconds.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(0);
        self
    }

    /// Deserializes a JSON payload.
    pub fn json_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// True once the store has assigned a global version.
    pub fn is_persisted(&self) -> bool {
        self.global_version > GlobalVersion::start()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn version_does_not_overflow() {
        let last = Version::new(i64::MAX);
        assert_eq!(last.checked_next(), None);
        assert_eq!(last.next(), last);
        assert_eq!(Version::first().checked_next(), Some(Version::new(2)));
    }

    #[test]
    fn global_version_starts_before_first_event() {
        assert_eq!(GlobalVersion::start().as_i64(), 0);
        assert_eq!(GlobalVersion::start().next(), GlobalVersion::new(1));
    }

    #[test]
    fn new_event_is_unsaved() {
        let event = Event::new("cart-1", "Cart", Version::first(), "Created");

        assert_eq!(event.aggregate_id.as_str(), "cart-1");
        assert_eq!(event.aggregate_type, "Cart");
        assert_eq!(event.reason, "Created");
        assert_eq!(event.global_version, GlobalVersion::start());
        assert!(!event.is_persisted());
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn timestamp_is_truncated_to_seconds() {
        let precise = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(750);
        let event = Event::new("a", "A", Version::first(), "R").with_timestamp(precise);

        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
        );
    }

    #[test]
    fn json_payload_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct ItemAdded {
            sku: String,
            quantity: u32,
        }

        let payload = ItemAdded {
            sku: "sku-1".to_string(),
            quantity: 3,
        };
        let event = Event::new("cart-1", "Cart", Version::first(), "ItemAdded")
            .with_json_data(&payload)
            .unwrap()
            .with_metadata(b"{\"correlation_id\":\"123\"}".to_vec());

        let restored: ItemAdded = event.json_data().unwrap();
        assert_eq!(restored, payload);
        assert_eq!(event.metadata, b"{\"correlation_id\":\"123\"}");
    }
}
