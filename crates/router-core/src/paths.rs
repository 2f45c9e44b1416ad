use std::path::PathBuf;

/// Overrides the data directory for tests and local experimentation.
pub const DATA_DIR_ENV_VAR: &str = "ROUTER_DATA_DIR";

/// One data directory per process: every persisted JSON document and the
/// shadow-bench database live under it. Resolution order: the test-mode
/// environment variable, then the platform data directory, falling back
/// to a dotfile under the home directory.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV_VAR) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("router"))
        .unwrap_or_else(|| PathBuf::from(".router"))
}

pub fn state_file(data_dir: &std::path::Path, name: &str) -> PathBuf {
    data_dir.join(name)
}

pub const LEDGER_FILE: &str = "ledger.json";
pub const RATE_GOVERNOR_FILE: &str = "rate-governor-state.json";
pub const CIRCUIT_BREAKER_FILE: &str = "circuit-breaker-state.json";
pub const RECENT_TASKS_FILE: &str = "recent-tasks.json";
pub const QUEUE_STATE_FILE: &str = "queue-state.json";
pub const ACTIVE_CONTEXT_FILE: &str = "active-context.json";
pub const BACKEND_HEALTH_FILE: &str = "backend-health.json";
pub const PENDING_PLANS_FILE: &str = "pending-plans.json";
pub const MODEL_REGISTRY_STATE_FILE: &str = "model-registry-state.json";
pub const REFINEMENT_QUEUE_FILE: &str = "refinement-queue.json";
pub const SHADOW_BENCH_DB_FILE: &str = "shadow-bench.db";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        std::env::set_var(DATA_DIR_ENV_VAR, "/tmp/router-test-data");
        assert_eq!(data_dir(), PathBuf::from("/tmp/router-test-data"));
        std::env::remove_var(DATA_DIR_ENV_VAR);
    }
}
