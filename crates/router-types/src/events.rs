use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

/// A lifecycle event pushed to the active-context broadcast bus. The UI
/// and notification bridges are subscribers, never co-owners of router
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouterEvent {
    TaskStarted {
        task_id: String,
        description: String,
    },
    StepDispatched {
        task_id: String,
        step_id: String,
        backend: BackendId,
    },
    StepCompleted {
        task_id: String,
        step_id: String,
        backend: BackendId,
        success: bool,
    },
    PlanAwaitingApproval {
        plan_id: String,
        total_api_cost: f64,
    },
    DedupSkipped {
        task_id: String,
        existing_task_id: String,
    },
    BreakerTransition {
        backend: BackendId,
        state: String,
    },
    GovernorThrottled {
        backend: BackendId,
        new_limit: u32,
    },
    ShadowCompleted {
        shadow_id: String,
        auto_score: f64,
    },
    ModelPromotion {
        model: String,
        task_type: String,
        difficulty_band: String,
        trust_score: f64,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub at: DateTime<Utc>,
    pub event: RouterEvent,
}
