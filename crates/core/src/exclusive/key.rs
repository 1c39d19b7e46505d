//! Exclusivity key type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a resource that at most one flow may operate on at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusiveKey(String);

impl ExclusiveKey {
    /// Key for an existing cluster.
    pub fn cluster(cluster_id: u64) -> Self {
        Self(format!("cluster-{}", cluster_id))
    }

    /// Key for a cluster that does not exist yet, identified by its domain.
    pub fn domain(domain: &str) -> Self {
        Self(format!("domain-{}", domain))
    }

    /// Wrap an already formatted key.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExclusiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
