//! Interfaces the router calls into shadow-bench through, and shadow-bench
//! calls back into the rate governor through, without either crate
//! depending on the other's concrete state. Both sides depend on these
//! shapes instead.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::backend::{BackendId, ExecutionOutcome};
use crate::events::RouterEvent;
use crate::task::TaskType;

/// Fire-and-forget shadow dispatch, called once a step's primary execution
/// succeeds. Implementations must never block the caller on I/O.
///
/// `complexity` is the task's assessed difficulty (0 meaning "not
/// assessed"); implementations should band difficulty from it and only
/// fall back to description length when it's 0.
pub trait ShadowDispatcher: Send + Sync {
    fn dispatch(&self, task_id: &str, task_type: TaskType, description: &str, complexity: u8, primary: &ExecutionOutcome);
}

pub struct NoopShadowDispatcher;

impl ShadowDispatcher for NoopShadowDispatcher {
    fn dispatch(
        &self,
        _task_id: &str,
        _task_type: TaskType,
        _description: &str,
        _complexity: u8,
        _primary: &ExecutionOutcome,
    ) {
    }
}

/// The subset of rate-governor state shadow-bench needs to decide whether
/// a subscription backend is idle enough to run a shadow on.
#[async_trait]
pub trait ShadowGovernorProbe: Send + Sync {
    async fn is_idle(&self, backend: BackendId, idle_threshold: f64) -> bool;
}

/// Trust-score lookup the router consults when narrowing model candidates
/// to ones shadow-bench has marked trustworthy for a task type/complexity.
#[async_trait]
pub trait TrustQuery: Send + Sync {
    async fn trusted_models(&self, task_type: TaskType, complexity: u8) -> BTreeSet<String>;
}

pub struct NoopTrustQuery;

#[async_trait]
impl TrustQuery for NoopTrustQuery {
    async fn trusted_models(&self, _task_type: TaskType, _complexity: u8) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Where shadow-bench publishes promotion/demotion and similar lifecycle
/// events, without depending on the concrete broadcast bus that lives in
/// the router crate.
pub trait ShadowEventSink: Send + Sync {
    fn publish(&self, event: RouterEvent);
}

pub struct NoopShadowEventSink;

impl ShadowEventSink for NoopShadowEventSink {
    fn publish(&self, _event: RouterEvent) {}
}
