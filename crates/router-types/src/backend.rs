use serde::{Deserialize, Serialize};
use std::fmt;

/// A reachable executor. The router never deals in free-form backend
/// strings; everywhere the original design used a name, this system uses
/// this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    ClaudeCode,
    Codex,
    Api,
    Local,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::ClaudeCode,
        BackendId::Codex,
        BackendId::Api,
        BackendId::Local,
    ];

    /// Subscription backends: no per-token dollar cost, but bounded
    /// concurrency and a session window.
    pub fn is_subscription(self) -> bool {
        matches!(self, BackendId::ClaudeCode | BackendId::Codex)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::ClaudeCode => "claude-code",
            BackendId::Codex => "codex",
            BackendId::Api => "api",
            BackendId::Local => "local",
        }
    }

    /// The static fallback chain used by the router and the rate governor
    /// when a backend is denied. Wraps around.
    pub fn fallback_chain() -> &'static [BackendId] {
        &[
            BackendId::ClaudeCode,
            BackendId::Codex,
            BackendId::Api,
            BackendId::Local,
        ]
    }

    pub fn next_in_chain(self) -> BackendId {
        let chain = Self::fallback_chain();
        let idx = chain.iter().position(|b| *b == self).unwrap_or(0);
        chain[(idx + 1) % chain.len()]
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" => Ok(BackendId::ClaudeCode),
            "codex" => Ok(BackendId::Codex),
            "api" => Ok(BackendId::Api),
            "local" => Ok(BackendId::Local),
            other => Err(format!("unknown backend id: {other}")),
        }
    }
}

/// Outcome of a single adapter execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub backend: BackendId,
    pub model: String,
    pub response: String,
    pub duration_ms: u64,
    pub tokens: u64,
    pub cost_usd: f64,
    pub output_path: Option<String>,
}

/// The error kind taxonomy from the error-handling design: ordered by
/// locality of recovery so callers can match on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Transient,
    RateLimit,
    BreakerDenied,
    BudgetExceeded,
    Fatal,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub backend: BackendId,
    pub message: String,
    pub should_fallback: bool,
    pub is_rate_limit: bool,
}

impl AdapterError {
    pub fn transient(backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Transient,
            backend,
            message: message.into(),
            should_fallback: true,
            is_rate_limit: false,
        }
    }

    pub fn rate_limit(backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::RateLimit,
            backend,
            message: message.into(),
            should_fallback: true,
            is_rate_limit: true,
        }
    }

    pub fn fatal(backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Fatal,
            backend,
            message: message.into(),
            should_fallback: false,
            is_rate_limit: false,
        }
    }
}
