mod auth;
mod error;
mod handlers;
mod rate_limit;
mod routes;

use anyhow::Context;
use chrono::Utc;
use judge_common::store::{MemoryStore, RateLimitStore, RedisStore, SubmissionStore};
use judge_common::{metrics, Config, IpRateLimiter, RateLimiter, StoreBackend};
use judge_worker::{
    ExecutionEngine, HttpEngine, QueueReceiver, SubmissionExecutor, SubmissionQueue, WorkerPool,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};

const IP_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

pub struct AppState {
    pub store: Arc<dyn SubmissionStore>,
    pub limiter: RateLimiter,
    pub ip_limiter: IpRateLimiter,
    pub queue: Arc<SubmissionQueue>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the shared services; the receiver goes to the worker pool
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SubmissionStore>,
        rate_store: Arc<dyn RateLimitStore>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> (Arc<Self>, QueueReceiver) {
        let (queue, receiver) = SubmissionQueue::bounded(config.queue_capacity);
        let state = Arc::new(Self {
            store,
            limiter: RateLimiter::new(rate_store),
            ip_limiter: IpRateLimiter::new(config.guest_max_requests, config.guest_window_minutes),
            queue,
            engine,
            config,
            start_time: Instant::now(),
        });
        (state, receiver)
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());
    init_tracing(config.log_json);

    info!("Judge API booting...");

    metrics::init_metrics();
    info!("Metrics registry initialized");

    let (store, rate_store): (Arc<dyn SubmissionStore>, Arc<dyn RateLimitStore>) =
        match config.store_backend {
            StoreBackend::Redis => {
                let redis = Arc::new(
                    RedisStore::connect(&config.redis_url)
                        .await
                        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?,
                );
                info!("Connected to Redis: {}", config.redis_url);
                (
                    redis.clone() as Arc<dyn SubmissionStore>,
                    redis as Arc<dyn RateLimitStore>,
                )
            }
            StoreBackend::Memory => {
                let memory = Arc::new(MemoryStore::new());
                info!("Using in-memory store; data is lost on restart");
                (
                    memory.clone() as Arc<dyn SubmissionStore>,
                    memory as Arc<dyn RateLimitStore>,
                )
            }
        };

    let engine: Arc<dyn ExecutionEngine> = Arc::new(HttpEngine::from_config(&config));
    for (language, url) in &config.executor_urls {
        info!(%language, url = %url, "Sandbox executor registered");
    }

    let (state, receiver) = AppState::new(config.clone(), store.clone(), rate_store, engine.clone());

    let executor = SubmissionExecutor::new(store, engine, config.clone());
    let pool = WorkerPool::spawn(config.worker_count, state.queue.clone(), receiver, executor);

    tokio::spawn(prune_guest_windows(state.clone()));

    let app = routes::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!(
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Ready to accept submissions"
    );

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    pool.shutdown().await;
    info!("Judge API shutdown complete");

    served.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, draining queue...");
}

/// Drop expired per-IP guest windows so the map stays bounded
async fn prune_guest_windows(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(IP_PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        let removed = state.ip_limiter.prune(Utc::now());
        if removed > 0 {
            debug!(
                removed,
                tracked = state.ip_limiter.tracked_ips(),
                "Pruned guest rate limit windows"
            );
        }
    }
}
