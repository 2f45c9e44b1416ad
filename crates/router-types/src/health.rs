use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Warm,
    Healthy,
    Cold,
    Dead,
}

impl HealthStatus {
    /// Router tiebreaker score.
    pub fn score(self) -> u32 {
        match self {
            HealthStatus::Warm => 100,
            HealthStatus::Healthy => 75,
            HealthStatus::Cold => 25,
            HealthStatus::Dead => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendHealthRecord {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub version: Option<String>,
    pub consecutive_failures: u32,
}
