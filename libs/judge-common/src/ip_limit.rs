//! In-memory per-IP limiter for unauthenticated guest creation.
//!
//! State lives only in this process: a restart forgets every window and
//! separate API instances do not share counts.

use crate::ratelimit::{RateLimitDecision, RateLimitStats, RateLimitedService};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug)]
struct IpWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

pub struct IpRateLimiter {
    max_requests: u32,
    window: Duration,
    // map lock guards insertion, entry locks guard the counters
    entries: RwLock<HashMap<String, Arc<Mutex<IpWindow>>>>,
}

impl IpRateLimiter {
    pub fn new(max_requests: u32, window_minutes: i64) -> Self {
        Self {
            max_requests,
            window: Duration::minutes(window_minutes),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, ip: &str, now: DateTime<Utc>) -> Arc<Mutex<IpWindow>> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ip)
        {
            return entry.clone();
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(ip.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IpWindow {
                    count: 0,
                    reset_at: now + self.window,
                }))
            })
            .clone()
    }

    pub fn check(&self, ip: &str) -> RateLimitDecision {
        self.check_at(ip, Utc::now())
    }

    pub fn check_at(&self, ip: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let entry = self.entry(ip, now);
        let mut window = entry.lock().unwrap_or_else(PoisonError::into_inner);

        if now > window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        let allowed = window.count < self.max_requests;
        if allowed {
            window.count += 1;
        }

        RateLimitDecision {
            allowed,
            stats: RateLimitStats {
                service: RateLimitedService::GuestCreation,
                remaining: self.max_requests.saturating_sub(window.count),
                reset_at: window.reset_at,
                limit: self.max_requests,
            },
        }
    }

    /// Drop windows that have already expired; returns how many were removed
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            let window = entry.lock().unwrap_or_else(PoisonError::into_inner);
            now <= window.reset_at
        });
        before - entries.len()
    }

    pub fn tracked_ips(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
