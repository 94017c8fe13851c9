/// Test Evaluator - Per-Case Classification and Aggregation
///
/// **Core Responsibility:**
/// Run one submission against its test cases through an [`ExecutionEngine`],
/// compare outputs, classify every case and summarize the run.
///
/// **Critical Properties:**
/// - Knows nothing about Redis or the queue
/// - Cases run strictly in order, one sandbox call in flight at a time
/// - A failing case never stops the run; only the submission time budget does
///
/// **Aggregation Rules:**
/// The worst class of failure wins across all cases:
/// COMPILATION_ERROR > RUNTIME_ERROR > TIME_LIMIT_EXCEEDED >
/// MEMORY_LIMIT_EXCEEDED > WRONG_ANSWER > INTERNAL_ERROR > ACCEPTED

use crate::classifier::ErrorSignatures;
use crate::engine::{EngineError, ExecutionEngine, ExecutionOutput, ExecutionUnit, SandboxStatus};
use judge_common::metrics;
use judge_common::types::{
    Problem, Submission, SubmissionMetrics, SubmissionStatus, TestCase, TestCaseResult,
};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Shown to the submitter instead of infrastructure detail
pub const EXECUTION_FAILED_MESSAGE: &str = "Execution failed due to an internal error";
pub const NOT_EVALUATED_MESSAGE: &str = "Not evaluated: submission time budget exceeded";

/// Result of one evaluation run
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub results: Vec<TestCaseResult>,
    pub metrics: SubmissionMetrics,
    /// Operator-facing infrastructure detail, never shown to the submitter
    pub diagnostics: Vec<String>,
}

impl Evaluation {
    pub fn status(&self) -> SubmissionStatus {
        aggregate_status(&self.results)
    }

    pub fn diagnostic(&self) -> Option<String> {
        (!self.diagnostics.is_empty()).then(|| self.diagnostics.join("; "))
    }
}

/// Trim surrounding whitespace and fold `\r\n` / `\r` into `\n`
pub fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Order in which cases are executed: sequence number, then id
pub fn ordered_cases(test_cases: &[TestCase]) -> Vec<&TestCase> {
    let mut ordered: Vec<&TestCase> = test_cases.iter().collect();
    ordered.sort_by(|a, b| {
        a.sequence_number
            .cmp(&b.sequence_number)
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}

fn precedence(status: SubmissionStatus) -> u8 {
    match status {
        SubmissionStatus::CompilationError => 6,
        SubmissionStatus::RuntimeError => 5,
        SubmissionStatus::TimeLimitExceeded => 4,
        SubmissionStatus::MemoryLimitExceeded => 3,
        SubmissionStatus::WrongAnswer => 2,
        SubmissionStatus::InternalError => 1,
        _ => 0,
    }
}

/// Collapse per-case statuses into the submission verdict
///
/// An empty result list is an INTERNAL_ERROR: a submission with nothing to
/// grade must never be reported as accepted.
pub fn aggregate_status(results: &[TestCaseResult]) -> SubmissionStatus {
    results
        .iter()
        .map(|r| r.status)
        .filter(|s| precedence(*s) > 0)
        .max_by_key(|s| precedence(*s))
        .unwrap_or(if results.is_empty() {
            SubmissionStatus::InternalError
        } else {
            SubmissionStatus::Accepted
        })
}

/// Aggregate metrics: worst-case time and memory, not sums
pub fn summarize(results: &[TestCaseResult]) -> SubmissionMetrics {
    SubmissionMetrics {
        execution_time_ms: results.iter().map(|r| r.execution_time_ms).max().unwrap_or(0),
        memory_used_kb: results.iter().map(|r| r.memory_used_kb).max().unwrap_or(0),
        test_cases_passed: results.iter().filter(|r| r.passed()).count() as u32,
        test_cases_total: results.len() as u32,
    }
}

/// Canonical case status for a sandbox answer
///
/// Error signatures are consulted only where the sandbox status is already a
/// failure (runtime error) or where the output failed to match. Output that
/// matches the expected answer is never demoted by the heuristic.
pub fn classify(
    output: &ExecutionOutput,
    expected: &str,
    memory_limit_kb: Option<u64>,
    signatures: &ErrorSignatures,
) -> SubmissionStatus {
    match output.status {
        SandboxStatus::RuntimeError => signatures
            .reclassify(&output.output)
            .unwrap_or(SubmissionStatus::RuntimeError),
        SandboxStatus::Success => {
            if memory_limit_kb.is_some_and(|limit| output.memory_used_kb > limit) {
                SubmissionStatus::MemoryLimitExceeded
            } else if normalize_output(&output.output) == normalize_output(expected) {
                SubmissionStatus::Accepted
            } else {
                signatures
                    .reclassify(&output.output)
                    .unwrap_or(SubmissionStatus::WrongAnswer)
            }
        }
        other => other.canonical(),
    }
}

fn case_result(
    case: &TestCase,
    status: SubmissionStatus,
    output: ExecutionOutput,
    memory_limit_kb: Option<u64>,
) -> TestCaseResult {
    let error = match status {
        SubmissionStatus::Accepted => None,
        SubmissionStatus::WrongAnswer if case.is_sample => Some(format!(
            "Expected:\n{}\n\nActual:\n{}",
            normalize_output(&case.expected_output),
            normalize_output(&output.output)
        )),
        SubmissionStatus::WrongAnswer => Some("Output does not match expected output".to_string()),
        SubmissionStatus::TimeLimitExceeded => Some("Time limit exceeded".to_string()),
        SubmissionStatus::MemoryLimitExceeded => Some(match memory_limit_kb {
            Some(limit) => format!(
                "Memory limit exceeded: used {} KB of {} KB",
                output.memory_used_kb, limit
            ),
            None => "Memory limit exceeded".to_string(),
        }),
        _ => Some(output.output.clone()),
    };

    // user-visible program text goes to stdout when it ran to completion
    let (stdout, stderr) = match status {
        SubmissionStatus::Accepted | SubmissionStatus::WrongAnswer => (output.output, String::new()),
        _ => (String::new(), output.output),
    };

    TestCaseResult {
        test_case_id: case.id.clone(),
        sequence_number: case.sequence_number,
        status,
        stdout,
        stderr,
        error,
        execution_time_ms: output.execution_time_ms,
        memory_used_kb: output.memory_used_kb,
    }
}

fn unexecuted_result(case: &TestCase, message: &str) -> TestCaseResult {
    TestCaseResult {
        test_case_id: case.id.clone(),
        sequence_number: case.sequence_number,
        status: SubmissionStatus::InternalError,
        stdout: String::new(),
        stderr: String::new(),
        error: Some(message.to_string()),
        execution_time_ms: 0,
        memory_used_kb: 0,
    }
}

pub struct Evaluator<'a> {
    engine: &'a dyn ExecutionEngine,
    signatures: &'a ErrorSignatures,
    dispatch_margin_ms: u64,
    max_budget_ms: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        engine: &'a dyn ExecutionEngine,
        signatures: &'a ErrorSignatures,
        dispatch_margin_ms: u64,
        max_budget_ms: u64,
    ) -> Self {
        Self {
            engine,
            signatures,
            dispatch_margin_ms,
            max_budget_ms,
        }
    }

    /// Wall-clock budget for a whole submission
    pub fn budget(&self, case_count: usize, time_limit_ms: u64) -> Duration {
        let per_case = time_limit_ms.saturating_add(self.dispatch_margin_ms);
        let total = per_case.saturating_mul(case_count as u64);
        Duration::from_millis(total.min(self.max_budget_ms))
    }

    /// Run every test case in order and classify the outcomes
    ///
    /// `time_limit_ms` is the already-clamped per-case execution limit.
    pub async fn evaluate(
        &self,
        submission: &Submission,
        problem: &Problem,
        test_cases: &[TestCase],
        time_limit_ms: u64,
    ) -> Evaluation {
        let ordered = ordered_cases(test_cases);
        let budget = self.budget(ordered.len(), time_limit_ms);
        let memory_limit_kb = problem.memory_limit_kb();
        let parser = problem.parsers.get(&submission.language).map(String::as_str);
        let started = Instant::now();

        let mut evaluation = Evaluation::default();

        for (index, case) in ordered.iter().enumerate() {
            if started.elapsed() >= budget {
                let skipped = ordered.len() - index;
                warn!(
                    submission_id = %submission.id,
                    skipped,
                    budget_ms = budget.as_millis() as u64,
                    "Submission time budget exceeded; remaining cases not evaluated"
                );
                evaluation.results.extend(
                    ordered[index..]
                        .iter()
                        .map(|case| unexecuted_result(case, NOT_EVALUATED_MESSAGE)),
                );
                break;
            }

            let unit = ExecutionUnit {
                language: submission.language,
                code: &submission.code,
                input: &case.input,
                function_name: problem.function_name.as_deref(),
                parser,
                time_limit_ms,
            };

            let result = match self.engine.execute(&unit).await {
                Ok(output) => {
                    let status =
                        classify(&output, &case.expected_output, memory_limit_kb, self.signatures);
                    if output.status != SandboxStatus::Success
                        && status != output.status.canonical()
                    {
                        debug!(
                            submission_id = %submission.id,
                            test_case = %case.id,
                            from = %output.status.canonical(),
                            to = %status,
                            "Case reclassified by error signature"
                        );
                    }
                    case_result(case, status, output, memory_limit_kb)
                }
                Err(e) => {
                    error!(
                        submission_id = %submission.id,
                        test_case = %case.id,
                        language = %submission.language,
                        error = %e,
                        "Sandbox dispatch failed"
                    );
                    metrics::record_dispatch_failure(&submission.language.to_string(), e.kind());
                    evaluation
                        .diagnostics
                        .push(format!("test case {}: {}", case.id, e));
                    unexecuted_result(case, dispatch_error_message(&e))
                }
            };

            debug!(
                submission_id = %submission.id,
                test_case = %case.id,
                status = %result.status,
                time_ms = result.execution_time_ms,
                "Case evaluated"
            );
            evaluation.results.push(result);
        }

        evaluation.metrics = summarize(&evaluation.results);
        evaluation
    }
}

fn dispatch_error_message(error: &EngineError) -> &'static str {
    match error {
        EngineError::UnsupportedLanguage(_) => "Language is not supported",
        _ => EXECUTION_FAILED_MESSAGE,
    }
}
