use serde::{Deserialize, Serialize};

/// Identifier of an aggregate instance.
///
/// Wraps the caller-chosen string so aggregate IDs cannot be mixed up with
/// aggregate types, event reasons or other plain strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Creates an aggregate ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID, returning the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AggregateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AggregateId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<AggregateId> for String {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_preserves_value() {
        let id = AggregateId::new("cart-1");
        assert_eq!(id.as_str(), "cart-1");
        assert_eq!(id.to_string(), "cart-1");
        assert_eq!(String::from(id), "cart-1");
    }

    #[test]
    fn aggregate_id_conversions_agree() {
        assert_eq!(AggregateId::from("a"), AggregateId::from("a".to_string()));
        assert_ne!(AggregateId::from("a"), AggregateId::from("b"));
    }

    #[test]
    fn aggregate_id_serializes_as_plain_string() {
        let id = AggregateId::new("order-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"order-7\"");
        let deserialized: AggregateId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
