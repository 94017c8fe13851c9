// Route definitions for the judge API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use judge_common::RateLimitedService;
use std::sync::Arc;

use crate::rate_limit::{enforce_guest_limit, enforce_user_limit};
use crate::{handlers, AppState};

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let submit = Router::new()
        .route("/submissions", post(handlers::create_submission))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RateLimitedService::CodeSubmission),
            enforce_user_limit,
        ));

    let execute = Router::new()
        .route("/execute", post(handlers::execute_code))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RateLimitedService::CodeExecution),
            enforce_user_limit,
        ));

    let guest = Router::new()
        .route("/guest", post(handlers::create_guest))
        .route_layer(middleware::from_fn_with_state(state, enforce_guest_limit));

    Router::new()
        .merge(submit)
        .merge(execute)
        .merge(guest)
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/rate-limits", get(handlers::rate_limit_stats))
        .route(
            "/rate-limits/:service/consume",
            post(handlers::consume_rate_limit),
        )
        .route("/admin/rate-limits", put(handlers::set_rate_limit))
        .route(
            "/admin/rate-limits/:user_id",
            get(handlers::get_rate_limit_record),
        )
        .route(
            "/admin/submissions/:id/requeue",
            post(handlers::requeue_submission),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes(state.clone()))
        .with_state(state)
}
