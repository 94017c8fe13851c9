pub mod config;
pub mod ip_limit;
pub mod metrics;
pub mod ratelimit;
pub mod redis;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{Config, StoreBackend};
pub use ip_limit::IpRateLimiter;
pub use ratelimit::{
    RateLimitDecision, RateLimitError, RateLimitStats, RateLimitSubject, RateLimitedService,
    RateLimiter,
};
pub use store::{MemoryStore, RateLimitStore, RedisStore, StoreError, SubmissionStore};
pub use types::{
    Language, Problem, Submission, SubmissionMetrics, SubmissionStatus, TestCase, TestCaseResult,
};
