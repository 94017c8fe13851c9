/// Execution Engine - Dispatch of One Unit of Work to a Sandbox
///
/// **Core Responsibility:**
/// Send (language, code, input, time limit) to the sandbox registered for
/// the language and normalize its answer into an [`ExecutionOutput`].
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to reach a sandbox (HTTP endpoint per language)
/// - Engine does NOT compare outputs or know scoring rules
/// - Engine makes exactly one call per invocation, never retries
///
/// A sandbox that answers late is the user's problem (time limit exceeded);
/// a sandbox that cannot be reached or answers garbage is ours
/// ([`EngineError`], surfaced as INTERNAL_ERROR).

use async_trait::async_trait;
use judge_common::types::{Language, SubmissionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One unit of work for a sandbox
#[derive(Debug, Clone)]
pub struct ExecutionUnit<'a> {
    pub language: Language,
    pub code: &'a str,
    pub input: &'a str,
    pub function_name: Option<&'a str>,
    pub parser: Option<&'a str>,
    pub time_limit_ms: u64,
}

/// Status vocabulary spoken by the sandboxes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Success,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
}

impl SandboxStatus {
    const ALL: [SandboxStatus; 5] = [
        SandboxStatus::Success,
        SandboxStatus::CompilationError,
        SandboxStatus::RuntimeError,
        SandboxStatus::TimeLimitExceeded,
        SandboxStatus::MemoryLimitExceeded,
    ];

    pub fn parse(raw: &str) -> Option<SandboxStatus> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Success => "success",
            SandboxStatus::CompilationError => "compilation_error",
            SandboxStatus::RuntimeError => "runtime_error",
            SandboxStatus::TimeLimitExceeded => "time_limit_exceeded",
            SandboxStatus::MemoryLimitExceeded => "memory_limit_exceeded",
        }
    }

    /// Canonical status before output comparison; `Success` maps to
    /// ACCEPTED and may still be demoted by the evaluator
    pub fn canonical(&self) -> SubmissionStatus {
        match self {
            SandboxStatus::Success => SubmissionStatus::Accepted,
            SandboxStatus::CompilationError => SubmissionStatus::CompilationError,
            SandboxStatus::RuntimeError => SubmissionStatus::RuntimeError,
            SandboxStatus::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            SandboxStatus::MemoryLimitExceeded => SubmissionStatus::MemoryLimitExceeded,
        }
    }
}

/// Normalized sandbox answer for one unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub output: String,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
    pub status: SandboxStatus,
}

impl ExecutionOutput {
    /// Output used when the call deadline fired before the sandbox answered
    pub fn deadline_exceeded(time_limit_ms: u64) -> Self {
        Self {
            output: String::from("time limit exceeded"),
            execution_time_ms: time_limit_ms,
            memory_used_kb: 0,
            status: SandboxStatus::TimeLimitExceeded,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(Language),
    #[error("{language} executor unavailable: {reason}")]
    ExecutorUnavailable { language: Language, reason: String },
    #[error("{language} executor sent a malformed response: {reason}")]
    MalformedResponse { language: Language, reason: String },
}

impl EngineError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnsupportedLanguage(_) => "unsupported_language",
            EngineError::ExecutorUnavailable { .. } => "unavailable",
            EngineError::MalformedResponse { .. } => "malformed_response",
        }
    }
}

/// Execution engine trait
///
/// Any implementation must guarantee:
/// 1. At most one sandbox call per invocation
/// 2. A bounded wait (deadline → TimeLimitExceeded, never a hang)
/// 3. Infrastructure failures reported as `EngineError`, never as user errors
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, unit: &ExecutionUnit<'_>) -> Result<ExecutionOutput, EngineError>;
}

/// Request body posted to `/execute` on a sandbox
#[derive(Debug, Serialize)]
pub struct SandboxRequest<'a> {
    pub code: &'a str,
    pub input: &'a str,
    pub time_limit_ms: u64,
    pub language: Language,
    pub function_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<&'a str>,
}

/// Response body returned by a sandbox
#[derive(Debug, Deserialize)]
pub struct SandboxResponse {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub memory_used_kb: u64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct SandboxErrorBody {
    #[serde(alias = "message")]
    error: Option<String>,
}

/// HTTP dispatcher: one endpoint per language, stateless apart from the
/// pooled client
#[derive(Clone)]
pub struct HttpEngine {
    client: reqwest::Client,
    endpoints: HashMap<Language, String>,
    margin: Duration,
    max_time_limit_ms: u64,
}

impl HttpEngine {
    pub fn new(endpoints: HashMap<Language, String>, margin_ms: u64, max_time_limit_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            margin: Duration::from_millis(margin_ms),
            max_time_limit_ms,
        }
    }

    pub fn from_config(config: &judge_common::Config) -> Self {
        Self::new(
            config.executor_urls.clone(),
            config.dispatch_margin_ms,
            config.max_time_limit_ms,
        )
    }

    /// Network deadline for a call: the execution limit plus sandbox overhead,
    /// never more than the configured maximum plus the same overhead
    pub fn call_timeout(&self, time_limit_ms: u64) -> Duration {
        Duration::from_millis(time_limit_ms.min(self.max_time_limit_ms)) + self.margin
    }

    fn unavailable(language: Language, reason: impl Into<String>) -> EngineError {
        EngineError::ExecutorUnavailable {
            language,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpEngine {
    async fn execute(&self, unit: &ExecutionUnit<'_>) -> Result<ExecutionOutput, EngineError> {
        let language = unit.language;
        let endpoint = self
            .endpoints
            .get(&language)
            .ok_or(EngineError::UnsupportedLanguage(language))?;

        let payload = SandboxRequest {
            code: unit.code,
            input: unit.input,
            time_limit_ms: unit.time_limit_ms,
            language,
            function_name: unit.function_name.unwrap_or_default(),
            parser: unit.parser,
        };
        let timeout = self.call_timeout(unit.time_limit_ms);

        debug!(
            %language,
            endpoint = endpoint.as_str(),
            code_bytes = unit.code.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Dispatching to sandbox"
        );

        let response = match self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(ExecutionOutput::deadline_exceeded(unit.time_limit_ms))
            }
            Err(e) => return Err(Self::unavailable(language, e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<SandboxErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_default();
            return Err(Self::unavailable(
                language,
                format!("HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        let body: SandboxResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return Ok(ExecutionOutput::deadline_exceeded(unit.time_limit_ms))
            }
            Err(e) => {
                return Err(EngineError::MalformedResponse {
                    language,
                    reason: e.to_string(),
                })
            }
        };

        let sandbox_status =
            SandboxStatus::parse(&body.status).ok_or_else(|| EngineError::MalformedResponse {
                language,
                reason: format!("unknown status {:?}", body.status),
            })?;

        Ok(ExecutionOutput {
            output: body.output,
            execution_time_ms: body.execution_time_ms,
            memory_used_kb: body.memory_used_kb,
            status: sandbox_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_sandbox(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn engine_for(language: Language, addr: SocketAddr, margin_ms: u64) -> HttpEngine {
        let mut endpoints = HashMap::new();
        endpoints.insert(language, format!("http://{}/execute", addr));
        HttpEngine::new(endpoints, margin_ms, 30_000)
    }

    fn unit<'a>(language: Language, input: &'a str, time_limit_ms: u64) -> ExecutionUnit<'a> {
        ExecutionUnit {
            language,
            code: "print(input())",
            input,
            function_name: Some("solve"),
            parser: None,
            time_limit_ms,
        }
    }

    #[tokio::test]
    async fn test_success_response_is_normalized() {
        let app = Router::new().route(
            "/execute",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["function_name"], "solve");
                assert_eq!(req["language"], "python");
                assert!(req.get("parser").is_none());
                Json(json!({
                    "output": req["input"],
                    "execution_time_ms": 17,
                    "memory_used_kb": 2048,
                    "status": "success"
                }))
            }),
        );
        let addr = spawn_sandbox(app).await;
        let engine = engine_for(Language::Python, addr, 1000);

        let output = engine.execute(&unit(Language::Python, "3", 2000)).await.unwrap();
        assert_eq!(output.output, "3");
        assert_eq!(output.execution_time_ms, 17);
        assert_eq!(output.memory_used_kb, 2048);
        assert_eq!(output.status, SandboxStatus::Success);
    }

    #[tokio::test]
    async fn test_sandbox_statuses_map_one_to_one() {
        let app = Router::new().route(
            "/execute",
            post(|Json(req): Json<Value>| async move {
                Json(json!({ "output": "", "status": req["input"] }))
            }),
        );
        let addr = spawn_sandbox(app).await;
        let engine = engine_for(Language::Cpp, addr, 1000);

        for (raw, expected) in [
            ("success", SubmissionStatus::Accepted),
            ("compilation_error", SubmissionStatus::CompilationError),
            ("runtime_error", SubmissionStatus::RuntimeError),
            ("time_limit_exceeded", SubmissionStatus::TimeLimitExceeded),
        ] {
            let output = engine.execute(&unit(Language::Cpp, raw, 1000)).await.unwrap();
            assert_eq!(output.status.canonical(), expected, "status {}", raw);
        }
    }

    #[tokio::test]
    async fn test_unsupported_language_skips_network() {
        let engine = HttpEngine::new(HashMap::new(), 1000, 30_000);
        let err = engine
            .execute(&unit(Language::Java, "", 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedLanguage(Language::Java)));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_time_limit_exceeded() {
        let app = Router::new().route(
            "/execute",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "output": "late", "status": "success" }))
            }),
        );
        let addr = spawn_sandbox(app).await;
        let engine = engine_for(Language::Python, addr, 100);

        let started = std::time::Instant::now();
        let output = engine.execute(&unit(Language::Python, "", 200)).await.unwrap();
        assert_eq!(output.status, SandboxStatus::TimeLimitExceeded);
        assert_eq!(output.execution_time_ms, 200);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unreachable_sandbox_is_infrastructure_error() {
        // bind then drop so the port is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = engine_for(Language::Python, addr, 500);
        let err = engine
            .execute(&unit(Language::Python, "", 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutorUnavailable { .. }));
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn test_http_error_status_is_infrastructure_error() {
        let app = Router::new().route(
            "/execute",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid function name" })),
                )
            }),
        );
        let addr = spawn_sandbox(app).await;
        let engine = engine_for(Language::Python, addr, 500);

        let err = engine
            .execute(&unit(Language::Python, "", 1000))
            .await
            .unwrap_err();
        match err {
            EngineError::ExecutorUnavailable { reason, .. } => {
                assert!(reason.contains("400"));
                assert!(reason.contains("invalid function name"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_status_is_malformed() {
        let app = Router::new().route(
            "/execute",
            post(|| async { Json(json!({ "output": "", "status": "exploded" })) }),
        );
        let addr = spawn_sandbox(app).await;
        let engine = engine_for(Language::Javascript, addr, 500);

        let err = engine
            .execute(&unit(Language::Javascript, "", 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse { .. }));
    }

    #[test]
    fn test_call_timeout_is_bounded() {
        let engine = HttpEngine::new(HashMap::new(), 2000, 30_000);
        assert_eq!(engine.call_timeout(2000), Duration::from_millis(4000));
        assert_eq!(engine.call_timeout(120_000), Duration::from_millis(32_000));
    }
}
