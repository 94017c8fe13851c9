use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Languages with a registered sandbox executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for supported languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python,
            Language::Javascript,
            Language::Cpp,
            Language::Java,
        ]
    }

    /// Parse a language name (case-insensitive, common aliases accepted)
    pub fn parse(s: &str) -> Option<Language> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "javascript" | "js" => Some(Language::Javascript),
            "cpp" | "c++" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// Suffix used for the per-language executor URL variable
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Language::Python => "PYTHON",
            Language::Javascript => "JAVASCRIPT",
            Language::Cpp => "CPP",
            Language::Java => "JAVA",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Javascript => write!(f, "javascript"),
            Language::Cpp => write!(f, "cpp"),
            Language::Java => write!(f, "java"),
        }
    }
}

/// Submission State Machine
///
/// `Pending -> Running -> {terminal}`. The same values are reused as
/// per-test-case statuses, where only the terminal ones appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending | SubmissionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Running => "RUNNING",
            SubmissionStatus::Accepted => "ACCEPTED",
            SubmissionStatus::WrongAnswer => "WRONG_ANSWER",
            SubmissionStatus::CompilationError => "COMPILATION_ERROR",
            SubmissionStatus::RuntimeError => "RUNTIME_ERROR",
            SubmissionStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            SubmissionStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            SubmissionStatus::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problem metadata the evaluator needs: limits and sandbox wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: String,
    #[serde(default)]
    pub title: String,
    pub time_limit_ms: u64,
    /// 0 disables the memory check
    #[serde(default)]
    pub memory_limit_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Optional language-specific input parser snippet forwarded to the sandbox
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parsers: HashMap<Language, String>,
}

impl Problem {
    pub fn memory_limit_kb(&self) -> Option<u64> {
        (self.memory_limit_mb > 0).then(|| self.memory_limit_mb * 1024)
    }
}

/// Test Case Definition (read-only for the evaluator)
/// Evaluation order is ascending `sequence_number`, ties broken by `id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub problem_id: String,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
    #[serde(default)]
    pub points: u32,
    pub sequence_number: i32,
}

/// Outcome of one test case within one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: String,
    pub sequence_number: i32,
    pub status: SubmissionStatus,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
}

impl TestCaseResult {
    pub fn passed(&self) -> bool {
        self.status == SubmissionStatus::Accepted
    }
}

/// Aggregate metrics written back with the terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetrics {
    /// Worst case across test cases, not the sum
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
    pub test_cases_passed: u32,
    pub test_cases_total: u32,
}

/// Submission document as persisted and served to polling clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub results: Vec<TestCaseResult>,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
    pub test_cases_passed: u32,
    pub test_cases_total: u32,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_complexity: Option<String>,
    /// Operator-only failure detail; stripped before serving to non-admins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Submission {
    pub fn new(user_id: String, problem_id: String, language: Language, code: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            problem_id,
            language,
            code,
            status: SubmissionStatus::Pending,
            results: Vec::new(),
            execution_time_ms: 0,
            memory_used_kb: 0,
            test_cases_passed: 0,
            test_cases_total: 0,
            submitted_at: now,
            updated_at: now,
            time_complexity: None,
            memory_complexity: None,
            diagnostic: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Running;
        self.updated_at = now;
    }

    /// Record the terminal outcome of an evaluation run
    pub fn complete(
        &mut self,
        status: SubmissionStatus,
        results: Vec<TestCaseResult>,
        metrics: SubmissionMetrics,
        diagnostic: Option<String>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.results = results;
        self.execution_time_ms = metrics.execution_time_ms;
        self.memory_used_kb = metrics.memory_used_kb;
        self.test_cases_passed = metrics.test_cases_passed;
        self.test_cases_total = metrics.test_cases_total;
        self.diagnostic = diagnostic;
        self.updated_at = now;
    }

    /// Terminal INTERNAL_ERROR with no per-case detail
    pub fn fail(&mut self, diagnostic: impl Into<String>, now: DateTime<Utc>) {
        self.complete(
            SubmissionStatus::InternalError,
            Vec::new(),
            SubmissionMetrics::default(),
            Some(diagnostic.into()),
            now,
        );
    }

    /// Clear a failed run so an operator can push it through again
    pub fn reset_for_requeue(&mut self, now: DateTime<Utc>) {
        self.status = SubmissionStatus::Pending;
        self.results.clear();
        self.execution_time_ms = 0;
        self.memory_used_kb = 0;
        self.test_cases_passed = 0;
        self.test_cases_total = 0;
        self.diagnostic = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_serialization() {
        let json = serde_json::to_string(&Language::Cpp).unwrap();
        assert_eq!(json, "\"cpp\"");

        let deserialized: Language = serde_json::from_str("\"javascript\"").unwrap();
        assert_eq!(deserialized, Language::Javascript);
    }

    #[test]
    fn test_language_parse_aliases() {
        assert_eq!(Language::parse("Python"), Some(Language::Python));
        assert_eq!(Language::parse("js"), Some(Language::Javascript));
        assert_eq!(Language::parse("C++"), Some(Language::Cpp));
        assert_eq!(Language::parse("java"), Some(Language::Java));

        assert_eq!(Language::parse("pseudocode"), None);
        assert_eq!(Language::parse(""), None);
    }

    #[test]
    fn test_language_all_variants() {
        let variants = Language::all_variants();
        assert_eq!(variants.len(), 4);
        for lang in variants {
            assert_eq!(Language::parse(&lang.to_string()), Some(*lang));
        }
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&SubmissionStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"TIME_LIMIT_EXCEEDED\"");
        assert_eq!(SubmissionStatus::WrongAnswer.to_string(), "WRONG_ANSWER");

        let status: SubmissionStatus = serde_json::from_str("\"INTERNAL_ERROR\"").unwrap();
        assert_eq!(status, SubmissionStatus::InternalError);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::Accepted.is_terminal());
        assert!(SubmissionStatus::InternalError.is_terminal());
    }

    #[test]
    fn test_submission_document_shape() {
        let mut submission = Submission::new(
            "user-1".to_string(),
            "two-sum".to_string(),
            Language::Python,
            "print(3)".to_string(),
        );
        submission.complete(
            SubmissionStatus::WrongAnswer,
            vec![TestCaseResult {
                test_case_id: "tc-1".to_string(),
                sequence_number: 1,
                status: SubmissionStatus::WrongAnswer,
                stdout: "4".to_string(),
                stderr: String::new(),
                error: None,
                execution_time_ms: 12,
                memory_used_kb: 900,
            }],
            SubmissionMetrics {
                execution_time_ms: 12,
                memory_used_kb: 900,
                test_cases_passed: 0,
                test_cases_total: 1,
            },
            None,
            Utc::now(),
        );

        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(value["status"], "WRONG_ANSWER");
        assert_eq!(value["execution_time_ms"], 12);
        assert_eq!(value["memory_used_kb"], 900);
        assert_eq!(value["test_cases_passed"], 0);
        assert_eq!(value["test_cases_total"], 1);
        assert_eq!(value["results"][0]["stdout"], "4");
        assert_eq!(value["results"][0]["status"], "WRONG_ANSWER");
        assert!(value.get("diagnostic").is_none());
    }

    #[test]
    fn test_reset_for_requeue_clears_run() {
        let mut submission = Submission::new(
            "u".to_string(),
            "p".to_string(),
            Language::Java,
            String::new(),
        );
        submission.fail("executor unreachable", Utc::now());
        assert_eq!(submission.status, SubmissionStatus::InternalError);
        assert!(submission.diagnostic.is_some());

        submission.reset_for_requeue(Utc::now());
        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert!(submission.diagnostic.is_none());
        assert!(submission.results.is_empty());
    }

    #[test]
    fn test_problem_parsers_keyed_by_language() {
        let json = r#"{
            "problem_id": "sum",
            "time_limit_ms": 2000,
            "parsers": { "python": "import sys" }
        }"#;
        let problem: Problem = serde_json::from_str(json).unwrap();
        assert_eq!(problem.parsers.get(&Language::Python).map(String::as_str), Some("import sys"));
        assert_eq!(problem.memory_limit_kb(), None);
    }
}
