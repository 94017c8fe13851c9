//! Fixtures shared by the worker's unit tests.

use crate::engine::{EngineError, ExecutionEngine, ExecutionOutput, ExecutionUnit, SandboxStatus};
use async_trait::async_trait;
use judge_common::types::{Language, Problem, Submission, TestCase};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Duration;

/// Engine answering from a fixed script keyed by test input
pub struct ScriptedEngine {
    answers: HashMap<String, Result<ExecutionOutput, String>>,
    pub calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Time reported is `10 + input.len()` ms, memory `1000 * input.len()` KB
    pub fn answer(mut self, input: &str, output: &str, status: SandboxStatus) -> Self {
        self.answers.insert(
            input.to_string(),
            Ok(ExecutionOutput {
                output: output.to_string(),
                execution_time_ms: 10 + input.len() as u64,
                memory_used_kb: 1000 * input.len() as u64,
                status,
            }),
        );
        self
    }

    pub fn unavailable(mut self, input: &str) -> Self {
        self.answers
            .insert(input.to_string(), Err("connection refused".to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(&self, unit: &ExecutionUnit<'_>) -> Result<ExecutionOutput, EngineError> {
        self.calls.lock().unwrap().push(unit.input.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.answers.get(unit.input) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(EngineError::ExecutorUnavailable {
                language: unit.language,
                reason: reason.clone(),
            }),
            None => Err(EngineError::MalformedResponse {
                language: unit.language,
                reason: "no scripted answer".to_string(),
            }),
        }
    }
}

pub fn case(id: &str, seq: i32, input: &str, expected: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        problem_id: "sum".to_string(),
        input: input.to_string(),
        expected_output: expected.to_string(),
        is_sample: false,
        points: 10,
        sequence_number: seq,
    }
}

pub fn problem(time_limit_ms: u64) -> Problem {
    Problem {
        problem_id: "sum".to_string(),
        title: "Sum".to_string(),
        time_limit_ms,
        memory_limit_mb: 0,
        function_name: Some("solve".to_string()),
        parsers: HashMap::new(),
    }
}

pub fn submission() -> Submission {
    Submission::new(
        "user-1".to_string(),
        "sum".to_string(),
        Language::Python,
        "def solve(a, b): return a + b".to_string(),
    )
}
