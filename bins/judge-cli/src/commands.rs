use anyhow::{bail, Context, Result};
use chrono::Utc;
use judge_common::ratelimit::RateLimitRecord;
use judge_common::{
    Config, Problem, RateLimitedService, RateLimiter, RedisStore, SubmissionStore, TestCase,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

/// On-disk layout accepted by `import-problem`
#[derive(Debug, Deserialize)]
pub struct ProblemFile {
    pub problem: Problem,
    pub test_cases: Vec<TestCase>,
}

impl ProblemFile {
    pub fn parse(raw: &str) -> Result<Self> {
        let file: ProblemFile =
            serde_json::from_str(raw).context("Problem file is not valid JSON")?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let problem_id = self.problem.problem_id.trim();
        if problem_id.is_empty() {
            bail!("problem_id must not be empty");
        }
        if self.problem.time_limit_ms == 0 {
            bail!("time_limit_ms must be greater than zero");
        }
        if self.test_cases.is_empty() {
            bail!("Problem '{}' has no test cases", problem_id);
        }

        let mut seen = HashSet::new();
        for tc in &self.test_cases {
            if tc.problem_id != self.problem.problem_id {
                bail!(
                    "Test case '{}' belongs to problem '{}', expected '{}'",
                    tc.id,
                    tc.problem_id,
                    self.problem.problem_id
                );
            }
            if !seen.insert(tc.id.as_str()) {
                bail!("Duplicate test case id '{}'", tc.id);
            }
        }
        Ok(())
    }
}

async fn connect() -> Result<RedisStore> {
    let config = Config::from_env();
    RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))
}

pub async fn import_problem(path: &str) -> Result<()> {
    println!("📦 Importing problem from {}", path);

    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let file = ProblemFile::parse(&raw)?;

    let store = connect().await?;
    store.save_problem(&file.problem).await?;
    store
        .save_test_cases(&file.problem.problem_id, &file.test_cases)
        .await?;

    let samples = file.test_cases.iter().filter(|tc| tc.is_sample).count();
    println!("✅ Imported problem '{}'", file.problem.problem_id);
    println!("   Time limit:  {}ms", file.problem.time_limit_ms);
    if let Some(kb) = file.problem.memory_limit_kb() {
        println!("   Memory:      {}KB", kb);
    }
    println!(
        "   Test cases:  {} ({} sample)",
        file.test_cases.len(),
        samples
    );
    Ok(())
}

pub async fn show_submission(id: Uuid) -> Result<()> {
    let store = connect().await?;
    let Some(submission) = store.get_submission(id).await? else {
        bail!("Submission {} not found", id);
    };

    println!("📄 Submission {}", submission.id);
    println!("   User:      {}", submission.user_id);
    println!("   Problem:   {}", submission.problem_id);
    println!("   Language:  {}", submission.language);
    println!("   Status:    {}", submission.status);
    println!(
        "   Passed:    {}/{}",
        submission.test_cases_passed, submission.test_cases_total
    );
    println!(
        "   Time:      {}ms   Memory: {}KB",
        submission.execution_time_ms, submission.memory_used_kb
    );
    println!("   Submitted: {}", submission.submitted_at.to_rfc3339());
    if let Some(diagnostic) = &submission.diagnostic {
        println!("   ⚠️  Diagnostic: {}", diagnostic);
    }

    if submission.results.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<16} {:<24} {:>8} {:>10}",
        "SEQ", "TEST CASE", "STATUS", "TIME", "MEMORY"
    );
    println!("{}", "-".repeat(68));
    for result in &submission.results {
        println!(
            "{:<6} {:<16} {:<24} {:>6}ms {:>8}KB",
            result.sequence_number,
            result.test_case_id,
            result.status.as_str(),
            result.execution_time_ms,
            result.memory_used_kb
        );
        if let Some(error) = &result.error {
            for line in error.lines().take(6) {
                println!("       {}", line);
            }
        }
    }
    Ok(())
}

/// The queue lives inside the API process, so requeue goes through its admin route
pub async fn requeue_submission(id: Uuid, api_url: &str, admin: &str) -> Result<()> {
    let url = format!(
        "{}/admin/submissions/{}/requeue",
        api_url.trim_end_matches('/'),
        id
    );
    println!("🔁 Requeueing submission {}", id);

    let response = reqwest::Client::new()
        .post(&url)
        .header("x-user-id", admin)
        .header("x-user-role", "admin")
        .send()
        .await
        .with_context(|| format!("Failed to reach judge API at {}", api_url))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        bail!("Requeue rejected ({}): {}", status, message);
    }

    println!("✅ Submission {} queued", id);
    Ok(())
}

fn print_record(record: &RateLimitRecord) {
    let now = Utc::now();
    println!(
        "👤 {} ({}){}",
        record.user_id,
        record.username,
        if record.is_admin { " [admin]" } else { "" }
    );
    println!();
    println!(
        "{:<24} {:>6} {:>10} {:>8}   {}",
        "SERVICE", "USED", "REMAINING", "LIMIT", "RESETS AT"
    );
    println!("{}", "-".repeat(80));
    for limit in &record.services {
        let stats = limit.peek(now);
        let used = limit.max_requests.saturating_sub(stats.remaining);
        println!(
            "{:<24} {:>6} {:>10} {:>8}   {}",
            limit.service.as_str(),
            used,
            stats.remaining,
            stats.limit,
            stats.reset_at.to_rfc3339()
        );
    }
}

fn limiter(store: RedisStore) -> RateLimiter {
    RateLimiter::new(Arc::new(store))
}

pub async fn show_limits(user_id: &str) -> Result<()> {
    let limiter = limiter(connect().await?);
    match limiter.record(user_id).await? {
        Some(record) => print_record(&record),
        None => println!("ℹ️  No rate limit record for '{}' yet", user_id),
    }
    Ok(())
}

pub async fn set_limit(user_id: &str, service: &str, max: u32) -> Result<()> {
    let Some(service) = RateLimitedService::parse(service) else {
        let known: Vec<&str> = RateLimitedService::all_variants()
            .iter()
            .map(|s| s.as_str())
            .collect();
        bail!(
            "Unknown service '{}'. Valid services: {}",
            service,
            known.join(", ")
        );
    };

    let limiter = limiter(connect().await?);
    let updated = limiter.set_limit(user_id, service, max).await?;

    println!(
        "✅ {} limit for '{}' set to {} per {} minutes",
        updated.service, user_id, updated.max_requests, updated.window_minutes
    );
    println!("   Used in current window: {}", updated.current_count);
    Ok(())
}
