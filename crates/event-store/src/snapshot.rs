use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{AggregateId, GlobalVersion, Version};

/// A snapshot of an aggregate's state at a specific version.
///
/// Snapshots are used to optimize aggregate reconstruction by providing
/// a starting point, avoiding the need to replay all events from the beginning.
/// They are a disposable cache: the events remain the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub id: AggregateId,

    /// The type of aggregate (e.g., "Cart", "Order").
    pub aggregate_type: String,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    /// Global version of the last event folded into the state.
    pub global_version: GlobalVersion,

    /// The serialized aggregate state.
    pub state: Vec<u8>,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(
        id: impl Into<AggregateId>,
        aggregate_type: impl Into<String>,
        version: Version,
        global_version: GlobalVersion,
        state: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            global_version,
            state: state.into(),
        }
    }

    /// Creates a snapshot from a serializable state, encoded as JSON.
    pub fn from_state<T: Serialize>(
        id: impl Into<AggregateId>,
        aggregate_type: impl Into<String>,
        version: Version,
        global_version: GlobalVersion,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            id,
            aggregate_type,
            version,
            global_version,
            serde_json::to_vec(state)?,
        ))
    }

    /// Deserializes a JSON state into a concrete type.
    pub fn into_state<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct CartState {
        items: Vec<String>,
        total: i64,
    }

    #[test]
    fn snapshot_new() {
        let snapshot = Snapshot::new(
            "cart-1",
            "Cart",
            Version::new(5),
            GlobalVersion::new(42),
            b"state".to_vec(),
        );

        assert_eq!(snapshot.id.as_str(), "cart-1");
        assert_eq!(snapshot.aggregate_type, "Cart");
        assert_eq!(snapshot.version, Version::new(5));
        assert_eq!(snapshot.global_version, GlobalVersion::new(42));
        assert_eq!(snapshot.state, b"state");
    }

    #[test]
    fn snapshot_from_state_and_into_state() {
        let original = CartState {
            items: vec!["sku-1".to_string()],
            total: 1299,
        };

        let snapshot = Snapshot::from_state(
            "cart-1",
            "Cart",
            Version::new(3),
            GlobalVersion::new(9),
            &original,
        )
        .unwrap();

        let restored: CartState = snapshot.into_state().unwrap();
        assert_eq!(restored, original);
    }
}
