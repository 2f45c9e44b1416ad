use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyBand {
    Easy,
    Medium,
    Hard,
}

impl DifficultyBand {
    pub fn from_complexity(complexity: u8) -> Self {
        if complexity <= 3 {
            DifficultyBand::Easy
        } else if complexity <= 6 {
            DifficultyBand::Medium
        } else {
            DifficultyBand::Hard
        }
    }

    pub fn from_description_len(len: usize) -> Self {
        if len < 80 {
            DifficultyBand::Easy
        } else if len < 300 {
            DifficultyBand::Medium
        } else {
            DifficultyBand::Hard
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyBand::Easy => "easy",
            DifficultyBand::Medium => "medium",
            DifficultyBand::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub backend: BackendId,
    pub model: String,
    pub duration_ms: u64,
    pub tokens: u64,
    pub cost_usd: f64,
    pub output_length: usize,
    pub output_hash: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowResult {
    pub id: String,
    pub primary_task_id: String,
    pub task_type: String,
    pub description: String,
    pub primary: ExecutionRecord,
    pub shadow: ExecutionRecord,
    pub auto_score: f64,
    pub user_score: Option<f64>,
    pub length_similarity: f64,
    pub structure_similarity: f64,
    pub key_term_overlap: f64,
    pub code_parses: bool,
    pub difficulty_band: DifficultyBand,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTrend {
    Rising,
    Stable,
    Falling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub model: String,
    pub task_type: String,
    pub band: String,
    pub score: f64,
    pub samples: u64,
    /// Cumulative weight behind `score`'s running mean — user-scored
    /// samples count more than auto-scored ones. Distinct from `samples`,
    /// which is a plain update count used for trust-threshold gating.
    pub total_weight: f64,
    pub trend: TrustTrend,
    pub backends: Vec<BackendId>,
    pub last_updated: DateTime<Utc>,
}
