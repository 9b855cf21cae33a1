use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Aggregate usage statistics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub files: u64,
    /// Bytes reported by the storage backend, not the sum of recorded sizes.
    pub storage_bytes: u64,
    pub views: u64,
    pub types: BTreeMap<String, u64>,
}

/// Persisted, timestamped [`UsageStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: UsageStats,
}
