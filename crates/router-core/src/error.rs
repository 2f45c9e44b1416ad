use router_types::BackendId;
use serde::{Deserialize, Serialize};

/// Router-level error taxonomy, ordered by locality of recovery. Every
/// component returns a structured outcome rather than throwing across its
/// boundary; the router only turns these into user-visible strings at its
/// outermost edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterErrorKind {
    Transient,
    RateLimited,
    BreakerOpen,
    BudgetExceeded,
    Fatal,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RouterError {
    pub kind: RouterErrorKind,
    pub backend: Option<BackendId>,
    pub message: String,
}

impl RouterError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: RouterErrorKind::Fatal, backend: None, message: message.into() }
    }

    pub fn budget_exceeded(backend: BackendId, message: impl Into<String>) -> Self {
        Self { kind: RouterErrorKind::BudgetExceeded, backend: Some(backend), message: message.into() }
    }

    pub fn breaker_open(backend: BackendId) -> Self {
        Self {
            kind: RouterErrorKind::BreakerOpen,
            backend: Some(backend),
            message: format!("circuit breaker open for {backend}"),
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
