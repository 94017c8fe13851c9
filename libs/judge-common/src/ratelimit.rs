//! Per-user, per-service fixed-window rate limiting.
//!
//! Each user owns one [`RateLimitRecord`] holding a [`ServiceLimit`] per
//! gated service. A check loads the record, applies the window arithmetic,
//! and writes it back. Two concurrent checks for the same user can both read
//! the same count; that race is accepted for this workload.

use crate::store::{RateLimitStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Services gated by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitedService {
    CodeCompletion,
    #[serde(rename = "pseudocode_to_code")]
    PseudocodeConversion,
    CodeExecution,
    CodeSubmission,
    AiAnalysis,
    AiHint,
    /// Limited per IP, never per user
    GuestCreation,
}

impl RateLimitedService {
    pub fn all_variants() -> &'static [RateLimitedService] {
        &[
            RateLimitedService::CodeCompletion,
            RateLimitedService::PseudocodeConversion,
            RateLimitedService::CodeExecution,
            RateLimitedService::CodeSubmission,
            RateLimitedService::AiAnalysis,
            RateLimitedService::AiHint,
            RateLimitedService::GuestCreation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitedService::CodeCompletion => "code_completion",
            RateLimitedService::PseudocodeConversion => "pseudocode_to_code",
            RateLimitedService::CodeExecution => "code_execution",
            RateLimitedService::CodeSubmission => "code_submission",
            RateLimitedService::AiAnalysis => "ai_analysis",
            RateLimitedService::AiHint => "ai_hint",
            RateLimitedService::GuestCreation => "guest_creation",
        }
    }

    pub fn parse(s: &str) -> Option<RateLimitedService> {
        Self::all_variants()
            .iter()
            .copied()
            .find(|service| service.as_str() == s)
    }
}

impl fmt::Display for RateLimitedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state for one service inside one user's record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub service: RateLimitedService,
    pub max_requests: u32,
    pub window_minutes: i64,
    pub current_count: u32,
    pub window_started_at: DateTime<Utc>,
    pub last_request_at: DateTime<Utc>,
}

/// Usage summary returned to clients and mirrored into `X-RateLimit-*` headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub service: RateLimitedService,
    #[serde(rename = "remaining_use")]
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(rename = "limit_per_hour")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub stats: RateLimitStats,
}

impl ServiceLimit {
    pub fn new(
        service: RateLimitedService,
        max_requests: u32,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            service,
            max_requests,
            window_minutes,
            current_count: 0,
            window_started_at: now,
            last_request_at: now,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.window_started_at + self.window()
    }

    fn stats(&self, remaining: u32) -> RateLimitStats {
        RateLimitStats {
            service: self.service,
            remaining,
            reset_at: self.reset_at(),
            limit: self.max_requests,
        }
    }

    /// Reset-if-expired, then check, then increment, as one step.
    /// A rejected check leaves the counter untouched.
    pub fn check_and_increment(&mut self, now: DateTime<Utc>) -> RateLimitDecision {
        if self.window_expired(now) {
            self.current_count = 0;
            self.window_started_at = now;
        }

        if self.current_count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                stats: self.stats(0),
            };
        }

        self.current_count += 1;
        self.last_request_at = now;
        RateLimitDecision {
            allowed: true,
            stats: self.stats(self.max_requests - self.current_count),
        }
    }

    /// Read-only view; an expired window reports the full allowance
    pub fn peek(&self, now: DateTime<Utc>) -> RateLimitStats {
        if self.window_expired(now) {
            self.stats(self.max_requests)
        } else {
            self.stats(self.max_requests.saturating_sub(self.current_count))
        }
    }

    /// A window ends strictly after `reset_at`
    fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.window_started_at > self.window()
    }
}

/// Persisted per-user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
    pub services: Vec<ServiceLimit>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn new(user_id: &str, username: &str, is_admin: bool, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            is_admin,
            services: default_limits(is_admin, now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Find the service entry, adding it from the defaults when missing.
    /// Missing entries take the ceiling for the caller's current role.
    /// `None` means the service is not user-limited at all.
    fn service_mut(
        &mut self,
        service: RateLimitedService,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Option<&mut ServiceLimit> {
        if let Some(idx) = self.services.iter().position(|s| s.service == service) {
            return self.services.get_mut(idx);
        }
        let default = default_limits(is_admin, now)
            .into_iter()
            .find(|s| s.service == service)?;
        self.services.push(default);
        self.services.last_mut()
    }
}

/// Default ceilings per hour; admins get materially higher ones
pub fn default_limits(is_admin: bool, now: DateTime<Utc>) -> Vec<ServiceLimit> {
    let table: [(RateLimitedService, u32, u32); 6] = [
        (RateLimitedService::CodeCompletion, 100, 1000),
        (RateLimitedService::PseudocodeConversion, 20, 100),
        (RateLimitedService::CodeExecution, 50, 200),
        (RateLimitedService::CodeSubmission, 50, 200),
        (RateLimitedService::AiAnalysis, 20, 100),
        (RateLimitedService::AiHint, 10, 50),
    ];

    table
        .iter()
        .map(|&(service, regular, admin)| {
            let max = if is_admin { admin } else { regular };
            ServiceLimit::new(service, max, 60, now)
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no rate limit record for user {0}")]
    UnknownUser(String),
    #[error("service {0} is not limited per user")]
    UnknownService(RateLimitedService),
}

/// Identity the limiter keys on
#[derive(Debug, Clone)]
pub struct RateLimitSubject<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
    pub is_admin: bool,
}

/// Persisted per-user limiter; construct once and share behind an `Arc`
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    async fn load_or_create(
        &self,
        subject: &RateLimitSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord, RateLimitError> {
        if let Some(record) = self.store.get_rate_limit(subject.user_id).await? {
            return Ok(record);
        }

        let record = RateLimitRecord::new(subject.user_id, subject.username, subject.is_admin, now);
        self.store.save_rate_limit(&record).await?;
        info!(
            user_id = subject.user_id,
            is_admin = subject.is_admin,
            "Created rate limit record with default limits"
        );
        Ok(record)
    }

    pub async fn check(
        &self,
        subject: &RateLimitSubject<'_>,
        service: RateLimitedService,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check_at(subject, service, Utc::now()).await
    }

    /// Check one request against `service` at time `now`, consuming a unit
    /// when allowed
    pub async fn check_at(
        &self,
        subject: &RateLimitSubject<'_>,
        service: RateLimitedService,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut record = self.load_or_create(subject, now).await?;

        let limit = record
            .service_mut(service, subject.is_admin, now)
            .ok_or(RateLimitError::UnknownService(service))?;
        let decision = limit.check_and_increment(now);

        debug!(
            user_id = subject.user_id,
            service = %service,
            count = limit.current_count,
            max = limit.max_requests,
            allowed = decision.allowed,
            "Rate limit check"
        );

        if decision.allowed {
            record.updated_at = now;
            self.store.save_rate_limit(&record).await?;
        } else {
            warn!(
                user_id = subject.user_id,
                service = %service,
                reset_at = %decision.stats.reset_at,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Current usage for every service in the user's record
    pub async fn stats_at(
        &self,
        subject: &RateLimitSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RateLimitStats>, RateLimitError> {
        let record = self.load_or_create(subject, now).await?;
        Ok(record.services.iter().map(|s| s.peek(now)).collect())
    }

    /// Admin override of `max_requests`; the current window's count is kept
    pub async fn set_limit(
        &self,
        user_id: &str,
        service: RateLimitedService,
        max_requests: u32,
    ) -> Result<ServiceLimit, RateLimitError> {
        let now = Utc::now();
        let mut record = self
            .store
            .get_rate_limit(user_id)
            .await?
            .ok_or_else(|| RateLimitError::UnknownUser(user_id.to_string()))?;

        let is_admin = record.is_admin;
        let limit = record
            .service_mut(service, is_admin, now)
            .ok_or(RateLimitError::UnknownService(service))?;
        limit.max_requests = max_requests;
        let updated = limit.clone();

        record.updated_at = now;
        self.store.save_rate_limit(&record).await?;

        info!(
            user_id,
            service = %service,
            max_requests,
            "Rate limit overridden"
        );
        Ok(updated)
    }

    pub async fn record(&self, user_id: &str) -> Result<Option<RateLimitRecord>, RateLimitError> {
        Ok(self.store.get_rate_limit(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn subject(is_admin: bool) -> RateLimitSubject<'static> {
        RateLimitSubject {
            user_id: "user-1",
            username: "alice",
            is_admin,
        }
    }

    #[test]
    fn test_window_allows_then_rejects_then_resets() {
        let mut limit = ServiceLimit::new(RateLimitedService::CodeExecution, 5, 60, t0());

        for expected_remaining in (0..5).rev() {
            let decision = limit.check_and_increment(t0() + Duration::minutes(1));
            assert!(decision.allowed);
            assert_eq!(decision.stats.remaining, expected_remaining);
        }

        let rejected = limit.check_and_increment(t0() + Duration::minutes(2));
        assert!(!rejected.allowed);
        assert_eq!(rejected.stats.remaining, 0);
        assert_eq!(rejected.stats.reset_at, t0() + Duration::minutes(60));
        assert_eq!(limit.current_count, 5);

        let later = t0() + Duration::minutes(61);
        let decision = limit.check_and_increment(later);
        assert!(decision.allowed);
        assert_eq!(decision.stats.remaining, 4);
        assert_eq!(limit.window_started_at, later);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let mut limit = ServiceLimit::new(RateLimitedService::AiHint, 1, 60, t0());
        assert!(limit.check_and_increment(t0()).allowed);

        // exactly window_duration later is still inside the window
        let edge = limit.check_and_increment(t0() + Duration::minutes(60));
        assert!(!edge.allowed);

        let after = limit.check_and_increment(t0() + Duration::minutes(60) + Duration::seconds(1));
        assert!(after.allowed);
    }

    #[test]
    fn test_peek_agrees_with_check_at_window_edge() {
        let mut limit = ServiceLimit::new(RateLimitedService::AiHint, 2, 60, t0());
        limit.check_and_increment(t0());
        limit.check_and_increment(t0());

        let edge = t0() + Duration::minutes(60);
        assert_eq!(limit.peek(edge).remaining, 0);
        assert!(!limit.check_and_increment(edge).allowed);

        let after = edge + Duration::seconds(1);
        assert_eq!(limit.peek(after).remaining, 2);
        assert!(limit.check_and_increment(after).allowed);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut limit = ServiceLimit::new(RateLimitedService::AiHint, 10, 60, t0());
        limit.check_and_increment(t0());
        limit.check_and_increment(t0());

        assert_eq!(limit.peek(t0()).remaining, 8);
        assert_eq!(limit.peek(t0() + Duration::hours(2)).remaining, 10);
        assert_eq!(limit.current_count, 2);
    }

    #[test]
    fn test_admin_defaults_are_higher() {
        let regular = default_limits(false, t0());
        let admin = default_limits(true, t0());
        for (r, a) in regular.iter().zip(admin.iter()) {
            assert_eq!(r.service, a.service);
            assert!(a.max_requests > r.max_requests);
        }
        assert!(regular
            .iter()
            .all(|s| s.service != RateLimitedService::GuestCreation));
    }

    #[test]
    fn test_service_wire_names() {
        let json = serde_json::to_string(&RateLimitedService::PseudocodeConversion).unwrap();
        assert_eq!(json, "\"pseudocode_to_code\"");
        assert_eq!(
            RateLimitedService::parse("code_submission"),
            Some(RateLimitedService::CodeSubmission)
        );
        assert_eq!(RateLimitedService::parse("unknown"), None);
    }

    #[tokio::test]
    async fn test_limiter_creates_record_lazily() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());

        assert!(store.get_rate_limit("user-1").await.unwrap().is_none());
        let decision = limiter
            .check_at(&subject(false), RateLimitedService::CodeSubmission, t0())
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.stats.limit, 50);
        assert_eq!(decision.stats.remaining, 49);

        let record = store.get_rate_limit("user-1").await.unwrap().unwrap();
        assert_eq!(record.username, "alice");
        let entry = record
            .services
            .iter()
            .find(|s| s.service == RateLimitedService::CodeSubmission)
            .unwrap();
        assert_eq!(entry.current_count, 1);
    }

    #[tokio::test]
    async fn test_limiter_rejects_sixth_request_and_recovers() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());
        let who = subject(false);

        // shrink the ceiling to 5 through the admin path
        limiter
            .check_at(&who, RateLimitedService::CodeExecution, t0())
            .await
            .unwrap();
        limiter
            .set_limit("user-1", RateLimitedService::CodeExecution, 5)
            .await
            .unwrap();

        for _ in 0..4 {
            let d = limiter
                .check_at(&who, RateLimitedService::CodeExecution, t0())
                .await
                .unwrap();
            assert!(d.allowed);
        }

        let sixth = limiter
            .check_at(&who, RateLimitedService::CodeExecution, t0())
            .await
            .unwrap();
        assert!(!sixth.allowed);
        assert_eq!(sixth.stats.remaining, 0);

        let next_window = t0() + Duration::minutes(61);
        let d = limiter
            .check_at(&who, RateLimitedService::CodeExecution, next_window)
            .await
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.stats.remaining, 4);
    }

    #[tokio::test]
    async fn test_missing_service_uses_current_role_defaults() {
        let store = Arc::new(MemoryStore::new());
        let mut record = RateLimitRecord::new("user-1", "alice", false, t0());
        record
            .services
            .retain(|s| s.service != RateLimitedService::AiHint);
        store.save_rate_limit(&record).await.unwrap();

        // promoted to admin after the record was created
        let limiter = RateLimiter::new(store);
        let decision = limiter
            .check_at(&subject(true), RateLimitedService::AiHint, t0())
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.stats.limit, 50);
        assert_eq!(decision.stats.remaining, 49);
    }

    #[tokio::test]
    async fn test_set_limit_keeps_window_count() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store);
        let who = subject(false);

        for _ in 0..3 {
            limiter
                .check_at(&who, RateLimitedService::AiHint, t0())
                .await
                .unwrap();
        }

        let updated = limiter
            .set_limit("user-1", RateLimitedService::AiHint, 3)
            .await
            .unwrap();
        assert_eq!(updated.current_count, 3);
        assert_eq!(updated.max_requests, 3);

        let d = limiter
            .check_at(&who, RateLimitedService::AiHint, t0())
            .await
            .unwrap();
        assert!(!d.allowed);
    }

    #[tokio::test]
    async fn test_set_limit_unknown_user() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let err = limiter
            .set_limit("ghost", RateLimitedService::AiHint, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::UnknownUser(_)));
    }

    #[tokio::test]
    async fn test_guest_creation_is_not_user_limited() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let err = limiter
            .check_at(&subject(true), RateLimitedService::GuestCreation, t0())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::UnknownService(RateLimitedService::GuestCreation)
        ));
    }

    #[tokio::test]
    async fn test_stats_reports_all_services() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let who = subject(true);
        limiter
            .check_at(&who, RateLimitedService::CodeCompletion, t0())
            .await
            .unwrap();

        let stats = limiter.stats_at(&who, t0()).await.unwrap();
        assert_eq!(stats.len(), 6);
        let completion = stats
            .iter()
            .find(|s| s.service == RateLimitedService::CodeCompletion)
            .unwrap();
        assert_eq!(completion.limit, 1000);
        assert_eq!(completion.remaining, 999);
    }
}
