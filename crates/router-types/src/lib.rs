//! Shared data types for the task router and scheduler: the Task/Plan/Step
//! model, per-backend state, the ledger, dedup entries, and shadow-bench
//! records. No behaviour lives here, only the shapes every other crate
//! builds on.

pub mod backend;
pub mod dedup;
pub mod dispatch;
pub mod events;
pub mod health;
pub mod ledger;
pub mod plan;
pub mod shadow;
pub mod task;

pub use backend::{AdapterError, AdapterErrorKind, BackendId, ExecutionOutcome};
pub use dedup::{DedupEntry, DedupOutcome, DedupRecommendation, DedupStatus};
pub use dispatch::{
    NoopShadowDispatcher, NoopShadowEventSink, NoopTrustQuery, ShadowDispatcher, ShadowEventSink, ShadowGovernorProbe,
    TrustQuery,
};
pub use events::{RouterEvent, TimestampedEvent};
pub use health::{BackendHealthRecord, HealthStatus};
pub use ledger::{
    ApiCounters, BudgetDecision, LedgerReport, LedgerState, LocalCounters, SavingsEntry,
    SubscriptionCounters, UserCosts,
};
pub use plan::{Plan, Step, StepType};
pub use shadow::{DifficultyBand, ExecutionRecord, ShadowResult, TrustScore, TrustTrend};
pub use task::{Task, TaskType, Urgency};
