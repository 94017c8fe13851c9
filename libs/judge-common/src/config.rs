use crate::types::Language;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Which persistence backend the process runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub store_backend: StoreBackend,
    pub port: u16,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub default_time_limit_ms: u64,
    pub max_time_limit_ms: u64,
    /// Added on top of the execution limit for the sandbox HTTP call
    pub dispatch_margin_ms: u64,
    /// Upper bound on the wall-clock budget of a whole submission
    pub max_submission_budget_ms: u64,
    pub guest_max_requests: u32,
    pub guest_window_minutes: i64,
    pub executor_urls: HashMap<Language, String>,
    pub log_json: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_executor_url(language: Language) -> String {
    let port = match language {
        Language::Python => 8001,
        Language::Javascript => 8002,
        Language::Cpp => 8003,
        Language::Java => 8004,
    };
    format!("http://localhost:{}/execute", port)
}

impl Config {
    pub fn from_env() -> Self {
        let executor_urls = Language::all_variants()
            .iter()
            .map(|lang| {
                let url = env::var(format!("EXECUTOR_URL_{}", lang.env_suffix()))
                    .unwrap_or_else(|_| default_executor_url(*lang));
                (*lang, url)
            })
            .collect();

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Redis,
        };

        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            store_backend,
            port: env_or("PORT", 3000),
            worker_count: env_or("WORKER_COUNT", 2usize).max(1),
            queue_capacity: env_or("QUEUE_CAPACITY", 100usize).max(1),
            default_time_limit_ms: env_or("DEFAULT_TIME_LIMIT_MS", 5000),
            max_time_limit_ms: env_or("MAX_TIME_LIMIT_MS", 30000),
            dispatch_margin_ms: env_or("DISPATCH_MARGIN_MS", 2000),
            max_submission_budget_ms: env_or("MAX_SUBMISSION_BUDGET_MS", 120_000),
            guest_max_requests: env_or("GUEST_MAX_REQUESTS", 3),
            guest_window_minutes: env_or("GUEST_WINDOW_MINUTES", 60),
            executor_urls,
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
        }
    }

    /// Clamp a requested time limit into `(0, max_time_limit_ms]`
    pub fn effective_time_limit(&self, requested_ms: u64) -> u64 {
        if requested_ms == 0 {
            self.default_time_limit_ms
        } else {
            requested_ms.min(self.max_time_limit_ms)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.default_time_limit_ms, 5000);
        assert_eq!(config.max_time_limit_ms, 30000);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.guest_max_requests, 3);
        assert_eq!(config.executor_urls.len(), Language::all_variants().len());
    }

    #[test]
    fn test_default_executor_ports() {
        assert_eq!(
            default_executor_url(Language::Python),
            "http://localhost:8001/execute"
        );
        assert_eq!(
            default_executor_url(Language::Java),
            "http://localhost:8004/execute"
        );
    }

    #[test]
    fn test_effective_time_limit() {
        let config = Config::default();
        assert_eq!(config.effective_time_limit(0), config.default_time_limit_ms);
        assert_eq!(config.effective_time_limit(2000), 2000);
        assert_eq!(
            config.effective_time_limit(10 * config.max_time_limit_ms),
            config.max_time_limit_ms
        );
    }
}
