/// Error Signature Rules - Heuristic Reclassification of Sandbox Output
///
/// Some sandboxes cannot tell "the program ran and printed an interpreter
/// trace" apart from "the program never parsed". The only signal left is the
/// captured text, so a small rule table maps known markers onto a canonical
/// status.
///
/// This is a heuristic, not ground truth: a program that legitimately prints
/// one of these markers will be misclassified. The evaluator limits where the
/// table is consulted (see `evaluator::classify`).

use judge_common::types::SubmissionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRule {
    pub pattern: String,
    pub status: SubmissionStatus,
}

/// Ordered pattern → status table; first match wins
#[derive(Debug, Clone)]
pub struct ErrorSignatures {
    rules: Vec<SignatureRule>,
}

impl ErrorSignatures {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, status: SubmissionStatus) -> Self {
        self.rules.push(SignatureRule {
            pattern: pattern.into(),
            status,
        });
        self
    }

    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    /// Status implied by the first marker found in `output`, if any
    pub fn reclassify(&self, output: &str) -> Option<SubmissionStatus> {
        self.rules
            .iter()
            .find(|rule| output.contains(rule.pattern.as_str()))
            .map(|rule| rule.status)
    }
}

impl Default for ErrorSignatures {
    /// Interpreter-level parse and name-resolution failures
    fn default() -> Self {
        Self::empty()
            .with_rule("SyntaxError", SubmissionStatus::CompilationError)
            .with_rule("IndentationError", SubmissionStatus::CompilationError)
            .with_rule("TabError", SubmissionStatus::CompilationError)
            .with_rule("NameError", SubmissionStatus::CompilationError)
            .with_rule("ReferenceError", SubmissionStatus::CompilationError)
    }
}
