//! Uniform façade over the four execution backends. Each adapter wraps a
//! different transport (interactive CLI process, paid HTTP API, local
//! model server) behind the same `BackendAdapter` trait so the router
//! never special-cases a backend beyond picking which adapter to call.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use router_types::{AdapterError, BackendId, ExecutionOutcome, Task};

/// Session utilisation reported by a subscription adapter, consulted by
/// the rate governor and the shadow-bench idle-threshold check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SessionStatus {
    pub session_percent_used: f64,
    pub is_authenticated: bool,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend(&self) -> BackendId;
    async fn is_available(&self) -> bool;
    async fn session_status(&self) -> SessionStatus;
    async fn execute_task(&self, task: &Task, model: Option<&str>) -> Result<ExecutionOutcome, AdapterError>;
}

/// Best-effort detection of rate-limit-shaped adapter output. Isolated
/// behind one predicate so the keyword set has exactly one place to
/// change and one place to test.
pub fn looks_like_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    const MARKERS: &[&str] = &["rate limit", "rate-limit", "throttle", "throttled", "quota"];
    MARKERS.iter().any(|m| lower.contains(m))
}

fn classify_process_failure(backend: BackendId, stderr: &str, stdout: &str) -> AdapterError {
    let combined = format!("{stdout}\n{stderr}");
    if looks_like_rate_limit(&combined) {
        AdapterError::rate_limit(backend, combined.trim().to_string())
    } else {
        AdapterError::transient(backend, combined.trim().to_string())
    }
}

/// Common shape for the two subscription-CLI adapters: spawn a process,
/// enforce a timeout, read both streams, and classify the outcome.
struct CliSpec {
    backend: BackendId,
    binary: &'static str,
    timeout: Duration,
}

async fn run_cli(spec: &CliSpec, task: &Task) -> Result<ExecutionOutcome, AdapterError> {
    let started = std::time::Instant::now();

    let mut child = Command::new(spec.binary)
        .arg(&task.description)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AdapterError::fatal(spec.backend, format!("failed to spawn {}: {e}", spec.binary)))?;

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    let wait = async {
        let status = child.wait().await;
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut s) = stdout_handle.take() {
            let _ = s.read_to_string(&mut stdout).await;
        }
        if let Some(mut s) = stderr_handle.take() {
            let _ = s.read_to_string(&mut stderr).await;
        }
        (status, stdout, stderr)
    };

    let (status, stdout, stderr) = match timeout(spec.timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            let _ = child.kill().await;
            let mut err = AdapterError::transient(spec.backend, "process timed out".to_string());
            err.should_fallback = true;
            return Err(err);
        }
    };

    match status {
        Ok(status) if status.success() => {
            tracing::debug!(backend = %spec.backend, "cli adapter completed");
            Ok(ExecutionOutcome {
                success: true,
                backend: spec.backend,
                model: spec.binary.to_string(),
                response: stdout,
                duration_ms: started.elapsed().as_millis() as u64,
                tokens: estimate_tokens(&task.description, task.files.len()),
                cost_usd: 0.0,
                output_path: task.output_path.clone(),
            })
        }
        Ok(_) => {
            tracing::warn!(backend = %spec.backend, "cli adapter exited with failure");
            Err(classify_process_failure(spec.backend, &stderr, &stdout))
        }
        Err(e) => Err(AdapterError::transient(spec.backend, e.to_string())),
    }
}

fn estimate_tokens(description: &str, file_count: usize) -> u64 {
    let base = ((description.len() as f64 / 4.0) * 1.3).ceil() as u64 + 2000 * file_count as u64;
    base.max(500)
}

pub struct ClaudeCodeAdapter {
    binary: &'static str,
    timeout: Duration,
}

impl ClaudeCodeAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { binary: "claude", timeout }
    }
}

#[async_trait]
impl BackendAdapter for ClaudeCodeAdapter {
    fn backend(&self) -> BackendId {
        BackendId::ClaudeCode
    }

    async fn is_available(&self) -> bool {
        Command::new(self.binary).arg("--version").output().await.is_ok()
    }

    async fn session_status(&self) -> SessionStatus {
        SessionStatus { session_percent_used: 0.0, is_authenticated: true }
    }

    async fn execute_task(&self, task: &Task, _model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
        run_cli(&CliSpec { backend: self.backend(), binary: self.binary, timeout: self.timeout }, task).await
    }
}

pub struct CodexAdapter {
    binary: &'static str,
    timeout: Duration,
}

impl CodexAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { binary: "codex", timeout }
    }
}

#[async_trait]
impl BackendAdapter for CodexAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Codex
    }

    async fn is_available(&self) -> bool {
        Command::new(self.binary).arg("--version").output().await.is_ok()
    }

    async fn session_status(&self) -> SessionStatus {
        SessionStatus { session_percent_used: 0.0, is_authenticated: true }
    }

    async fn execute_task(&self, task: &Task, _model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
        run_cli(&CliSpec { backend: self.backend(), binary: self.binary, timeout: self.timeout }, task).await
    }
}

/// Calls the selected paid model family via HTTP. The concrete model id
/// is resolved upstream by the model registry; this adapter just sends
/// the request and accounts for cost.
pub struct ApiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cost_per_1k_in: f64,
    cost_per_1k_out: f64,
}

impl ApiAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            cost_per_1k_in: 0.003,
            cost_per_1k_out: 0.015,
        }
    }
}

#[derive(Serialize)]
struct ApiRequestBody<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ApiResponseBody {
    completion: String,
    #[serde(default)]
    tokens: u64,
}

#[async_trait]
impl BackendAdapter for ApiAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Api
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn session_status(&self) -> SessionStatus {
        SessionStatus { session_percent_used: 0.0, is_authenticated: self.api_key.is_some() }
    }

    async fn execute_task(&self, task: &Task, model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
        let started = std::time::Instant::now();
        let model = model.unwrap_or("default");

        let mut request = self.client.post(format!("{}/v1/complete", self.base_url)).json(&ApiRequestBody {
            model,
            prompt: &task.description,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_reqwest_error(BackendId::Api, e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || looks_like_rate_limit(&body) {
                return Err(AdapterError::rate_limit(BackendId::Api, format!("http {status}: {body}")));
            }
            return Err(AdapterError::transient(BackendId::Api, format!("http {status}: {body}")));
        }

        let body: ApiResponseBody = response
            .json()
            .await
            .map_err(|e| AdapterError::transient(BackendId::Api, e.to_string()))?;

        let tokens = if body.tokens > 0 {
            body.tokens
        } else {
            estimate_tokens(&task.description, task.files.len())
        };
        let cost = 0.7 * (tokens as f64 / 1000.0) * self.cost_per_1k_in
            + 0.3 * (tokens as f64 / 1000.0) * self.cost_per_1k_out;

        Ok(ExecutionOutcome {
            success: true,
            backend: BackendId::Api,
            model: model.to_string(),
            response: body.completion,
            duration_ms: started.elapsed().as_millis() as u64,
            tokens,
            cost_usd: cost,
            output_path: task.output_path.clone(),
        })
    }
}

/// Posts to the local HTTP model server.
pub struct LocalAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl LocalAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl BackendAdapter for LocalAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Local
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn session_status(&self) -> SessionStatus {
        SessionStatus { session_percent_used: 0.0, is_authenticated: true }
    }

    async fn execute_task(&self, task: &Task, model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/complete", self.base_url))
            .json(&ApiRequestBody { model: model.unwrap_or("local"), prompt: &task.description })
            .send()
            .await
            .map_err(|e| classify_reqwest_error(BackendId::Local, e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AdapterError::transient(BackendId::Local, format!("http {status}")));
        }

        let body: ApiResponseBody = response
            .json()
            .await
            .map_err(|e| AdapterError::transient(BackendId::Local, e.to_string()))?;

        Ok(ExecutionOutcome {
            success: true,
            backend: BackendId::Local,
            model: model.unwrap_or("local").to_string(),
            response: body.completion,
            duration_ms: started.elapsed().as_millis() as u64,
            tokens: estimate_tokens(&task.description, task.files.len()),
            cost_usd: 0.0,
            output_path: task.output_path.clone(),
        })
    }
}

fn classify_reqwest_error(backend: BackendId, err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::transient(backend, format!("request timed out: {err}"))
    } else if err.is_connect() {
        AdapterError::fatal(backend, format!("connection failed: {err}"))
    } else {
        AdapterError::transient(backend, err.to_string())
    }
}

/// Selects the adapter for a backend id. Held by the router; constructed
/// once at startup from configuration.
#[derive(Clone)]
pub struct BackendRegistry {
    adapters: Arc<[(BackendId, Arc<dyn BackendAdapter>)]>,
}

impl BackendRegistry {
    pub fn new(adapters: Vec<Arc<dyn BackendAdapter>>) -> Self {
        let entries: Vec<_> = adapters.into_iter().map(|a| (a.backend(), a)).collect();
        Self { adapters: entries.into() }
    }

    pub fn get(&self, backend: BackendId) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.iter().find(|(id, _)| *id == backend).map(|(_, a)| a.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_markers() {
        assert!(looks_like_rate_limit("Error: you have hit the rate limit"));
        assert!(looks_like_rate_limit("429 Too Many Requests: quota exceeded"));
        assert!(!looks_like_rate_limit("permission denied"));
    }

    #[test]
    fn estimate_tokens_has_floor_and_file_weight() {
        assert_eq!(estimate_tokens("short", 0), 500);
        assert!(estimate_tokens("a".repeat(1000).as_str(), 3) > 6000);
    }
}
