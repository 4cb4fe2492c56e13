use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a global (saga) transaction.
///
/// Participants choose the id, so it is kept as an opaque string rather
/// than parsed. Newly generated ids are UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(String);

impl GlobalTxId {
    /// Creates a new random global transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for GlobalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GlobalTxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GlobalTxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<GlobalTxId> for String {
    fn from(id: GlobalTxId) -> Self {
        id.0
    }
}

impl AsRef<str> for GlobalTxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
