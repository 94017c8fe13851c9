// Prometheus metrics shared by the API and the in-process worker pool

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Submissions accepted into the queue (counter with language label)
    pub static ref SUBMISSIONS_ENQUEUED: CounterVec = CounterVec::new(
        Opts::new("judge_submissions_enqueued_total", "Total submissions accepted into the queue"),
        &["language"]
    )
    .expect("metric can be created");

    // Enqueue attempts refused (queue full, duplicate id)
    pub static ref SUBMISSIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("judge_submissions_rejected_total", "Total enqueue attempts refused"),
        &["reason"]
    )
    .expect("metric can be created");

    // Submissions reaching a terminal status (language and status labels)
    pub static ref SUBMISSIONS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("judge_submissions_completed_total", "Total submissions evaluated"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Wall-clock evaluation time per submission (in milliseconds)
    pub static ref EVALUATION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "judge_evaluation_time_ms",
            "Submission evaluation time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["language"]
    )
    .expect("metric can be created");

    // Sandbox calls that failed for infrastructure reasons
    pub static ref DISPATCH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("judge_dispatch_failures_total", "Sandbox calls failing for infrastructure reasons"),
        &["language", "kind"]
    )
    .expect("metric can be created");

    // Rate limit rejections per service
    pub static ref RATE_LIMIT_REJECTIONS: CounterVec = CounterVec::new(
        Opts::new("judge_rate_limit_rejections_total", "Requests refused by the rate limiter"),
        &["service"]
    )
    .expect("metric can be created");

    // Submissions waiting in or being processed by the worker pool
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "judge_queue_depth",
        "Submissions queued or in progress"
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Register every collector; safe to call more than once
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(SUBMISSIONS_ENQUEUED.clone()),
            Box::new(SUBMISSIONS_REJECTED.clone()),
            Box::new(SUBMISSIONS_COMPLETED.clone()),
            Box::new(EVALUATION_TIME.clone()),
            Box::new(DISPATCH_FAILURES.clone()),
            Box::new(RATE_LIMIT_REJECTIONS.clone()),
            Box::new(QUEUE_DEPTH.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register collector: {}", e);
            }
        }
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_submission_enqueued(language: &str) {
    SUBMISSIONS_ENQUEUED.with_label_values(&[language]).inc();
}

pub fn record_submission_rejected(reason: &str) {
    SUBMISSIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_submission_completed(language: &str, status: &str, evaluation_ms: f64) {
    SUBMISSIONS_COMPLETED
        .with_label_values(&[language, status])
        .inc();
    EVALUATION_TIME
        .with_label_values(&[language])
        .observe(evaluation_ms);
}

pub fn record_dispatch_failure(language: &str, kind: &str) {
    DISPATCH_FAILURES.with_label_values(&[language, kind]).inc();
}

pub fn record_rate_limited(service: &str) {
    RATE_LIMIT_REJECTIONS.with_label_values(&[service]).inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        init_metrics();
        init_metrics();
        record_submission_completed("python", "ACCEPTED", 120.0);
        record_rate_limited("code_submission");

        let text = render_metrics();
        assert!(text.contains("judge_submissions_completed_total"));
        assert!(text.contains("judge_rate_limit_rejections_total"));
    }
}
