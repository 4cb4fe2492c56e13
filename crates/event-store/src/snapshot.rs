use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GlobalTxId, Version};

/// A snapshot of a transaction's folded state at a specific journal version.
///
/// Recovery starts from the snapshot and replays only the events recorded
/// after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The transaction this snapshot belongs to.
    pub stream_id: GlobalTxId,

    /// The journal version the state was folded up to.
    pub version: Version,

    /// When the snapshot was created.
    pub timestamp: DateTime<Utc>,

    /// The serialized state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(stream_id: GlobalTxId, version: Version, state: serde_json::Value) -> Self {
        Self {
            stream_id,
            version,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        stream_id: GlobalTxId,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(stream_id, version, serde_json::to_value(state)?))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestState {
        counter: i64,
        name: String,
    }

    #[test]
    fn snapshot_from_state_and_into_state() {
        let id = GlobalTxId::from("gtx-snap");
        let original = TestState {
            counter: 2,
            name: "saga".to_string(),
        };

        let snapshot = Snapshot::from_state(id.clone(), Version::new(5), &original).unwrap();
        assert_eq!(snapshot.stream_id, id);
        assert_eq!(snapshot.version, Version::new(5));

        let restored: TestState = snapshot.into_state().unwrap();
        assert_eq!(restored, original);
    }
}
