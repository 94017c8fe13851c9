//! Persistence seams for the pipeline.
//!
//! The worker and the rate limiter only talk to these traits. `RedisStore`
//! keeps JSON documents under the keys from [`crate::redis`]; `MemoryStore`
//! backs development runs and tests.

use crate::ratelimit::RateLimitRecord;
use crate::redis::{problem_key, rate_limit_key, submission_key, testcases_key};
use crate::types::{Problem, Submission, TestCase};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError>;
    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError>;
    /// Test cases in storage order; callers sort before evaluating
    async fn get_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>, StoreError>;
    async fn save_test_cases(
        &self,
        problem_id: &str,
        test_cases: &[TestCase],
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get_rate_limit(&self, user_id: &str) -> Result<Option<RateLimitRecord>, StoreError>;
    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError>;
}

/// Redis-backed document store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        self.read(&submission_key(&id)).await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.write(&submission_key(&submission.id), submission).await
    }

    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        self.read(&problem_key(problem_id)).await
    }

    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        self.write(&problem_key(&problem.problem_id), problem).await
    }

    async fn get_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>, StoreError> {
        Ok(self
            .read::<Vec<TestCase>>(&testcases_key(problem_id))
            .await?
            .unwrap_or_default())
    }

    async fn save_test_cases(
        &self,
        problem_id: &str,
        test_cases: &[TestCase],
    ) -> Result<(), StoreError> {
        self.write(&testcases_key(problem_id), test_cases).await
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn get_rate_limit(&self, user_id: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        self.read(&rate_limit_key(user_id)).await
    }

    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        self.write(&rate_limit_key(&record.user_id), record).await
    }
}

/// In-process store with the same semantics as `RedisStore`
#[derive(Default)]
pub struct MemoryStore {
    submissions: RwLock<HashMap<Uuid, Submission>>,
    problems: RwLock<HashMap<String, Problem>>,
    test_cases: RwLock<HashMap<String, Vec<TestCase>>>,
    rate_limits: RwLock<HashMap<String, RateLimitRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.read().await.get(&id).cloned())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.submissions
            .write()
            .await
            .insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.read().await.get(problem_id).cloned())
    }

    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        self.problems
            .write()
            .await
            .insert(problem.problem_id.clone(), problem.clone());
        Ok(())
    }

    async fn get_test_cases(&self, problem_id: &str) -> Result<Vec<TestCase>, StoreError> {
        Ok(self
            .test_cases
            .read()
            .await
            .get(problem_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_test_cases(
        &self,
        problem_id: &str,
        test_cases: &[TestCase],
    ) -> Result<(), StoreError> {
        self.test_cases
            .write()
            .await
            .insert(problem_id.to_string(), test_cases.to_vec());
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get_rate_limit(&self, user_id: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.rate_limits.read().await.get(user_id).cloned())
    }

    async fn save_rate_limit(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        self.rate_limits
            .write()
            .await
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}
