//! Execution context identity.

use serde::{Deserialize, Serialize};

/// Identity of the logical caller (e.g. one simulated agent) that owns at most
/// one bound connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Numeric agent ids, as handed out by most simulation hosts.
impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}
