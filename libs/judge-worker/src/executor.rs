/// Submission Executor - One Submission from PENDING to a Terminal Status
///
/// Loads the submission with its problem and test cases, marks it RUNNING,
/// runs the evaluator and writes the aggregated verdict back exactly once.
/// Context that cannot be loaded ends the run as INTERNAL_ERROR; nothing is
/// retried automatically.

use crate::classifier::ErrorSignatures;
use crate::engine::ExecutionEngine;
use crate::evaluator::Evaluator;
use chrono::Utc;
use judge_common::metrics;
use judge_common::store::{StoreError, SubmissionStore};
use judge_common::types::{Submission, SubmissionStatus};
use judge_common::Config;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened to a dequeued identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No submission document under this id
    Missing,
    /// Already terminal; left untouched
    Skipped(SubmissionStatus),
    Completed(SubmissionStatus),
}

#[derive(Clone)]
pub struct SubmissionExecutor {
    store: Arc<dyn SubmissionStore>,
    engine: Arc<dyn ExecutionEngine>,
    signatures: Arc<ErrorSignatures>,
    config: Arc<Config>,
}

impl SubmissionExecutor {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        engine: Arc<dyn ExecutionEngine>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            engine,
            signatures: Arc::new(ErrorSignatures::default()),
            config,
        }
    }

    pub fn with_signatures(mut self, signatures: ErrorSignatures) -> Self {
        self.signatures = Arc::new(signatures);
        self
    }

    /// Evaluate a submission and persist its terminal status
    ///
    /// Store failures are returned to the caller; everything else ends in a
    /// persisted terminal status.
    pub async fn process(&self, id: Uuid) -> Result<ProcessOutcome, StoreError> {
        let Some(mut submission) = self.store.get_submission(id).await? else {
            warn!(submission_id = %id, "Submission not found; dropping");
            return Ok(ProcessOutcome::Missing);
        };

        if submission.status.is_terminal() {
            info!(
                submission_id = %id,
                status = %submission.status,
                "Submission already evaluated; skipping"
            );
            return Ok(ProcessOutcome::Skipped(submission.status));
        }

        let started = Instant::now();

        let problem = match self.store.get_problem(&submission.problem_id).await {
            Ok(Some(problem)) => problem,
            Ok(None) => {
                let detail = format!("problem {} not found", submission.problem_id);
                return self.fail(submission, detail).await;
            }
            Err(e) => {
                let detail = format!("loading problem {}: {}", submission.problem_id, e);
                return self.fail(submission, detail).await;
            }
        };

        let test_cases = match self.store.get_test_cases(&submission.problem_id).await {
            Ok(cases) if cases.is_empty() => {
                let detail = format!("problem {} has no test cases", submission.problem_id);
                return self.fail(submission, detail).await;
            }
            Ok(cases) => cases,
            Err(e) => {
                let detail = format!("loading test cases for {}: {}", submission.problem_id, e);
                return self.fail(submission, detail).await;
            }
        };

        submission.mark_running(Utc::now());
        self.store.save_submission(&submission).await?;

        let time_limit_ms = self.config.effective_time_limit(problem.time_limit_ms);
        info!(
            submission_id = %id,
            language = %submission.language,
            problem_id = %submission.problem_id,
            test_cases = test_cases.len(),
            time_limit_ms,
            "Evaluating submission"
        );

        let evaluator = Evaluator::new(
            self.engine.as_ref(),
            &self.signatures,
            self.config.dispatch_margin_ms,
            self.config.max_submission_budget_ms,
        );
        let evaluation = evaluator
            .evaluate(&submission, &problem, &test_cases, time_limit_ms)
            .await;

        let status = evaluation.status();
        let diagnostic = evaluation.diagnostic();
        let case_metrics = evaluation.metrics;
        submission.complete(
            status,
            evaluation.results,
            case_metrics,
            diagnostic,
            Utc::now(),
        );
        self.store.save_submission(&submission).await?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_submission_completed(
            &submission.language.to_string(),
            status.as_str(),
            elapsed_ms,
        );
        info!(
            submission_id = %id,
            %status,
            passed = case_metrics.test_cases_passed,
            total = case_metrics.test_cases_total,
            time_ms = case_metrics.execution_time_ms,
            memory_kb = case_metrics.memory_used_kb,
            "Submission evaluated"
        );

        Ok(ProcessOutcome::Completed(status))
    }

    async fn fail(
        &self,
        mut submission: Submission,
        detail: String,
    ) -> Result<ProcessOutcome, StoreError> {
        error!(
            submission_id = %submission.id,
            problem_id = %submission.problem_id,
            detail = %detail,
            "Submission context could not be loaded"
        );
        submission.fail(detail, Utc::now());
        self.store.save_submission(&submission).await?;
        metrics::record_submission_completed(
            &submission.language.to_string(),
            SubmissionStatus::InternalError.as_str(),
            0.0,
        );
        Ok(ProcessOutcome::Completed(SubmissionStatus::InternalError))
    }
}
