use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// A numeric range extracted from a description, e.g. "pages 11-20" -> (11, 20).
pub type ScopeMarker = (i64, i64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupEntry {
    pub task_id: String,
    pub normalized_description: String,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub status: DedupStatus,
    pub scopes: Vec<ScopeMarker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupRecommendation {
    Skip,
    Warn,
    Proceed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub recommendation: DedupRecommendation,
    pub existing_task_id: Option<String>,
    pub overlap: f64,
}
