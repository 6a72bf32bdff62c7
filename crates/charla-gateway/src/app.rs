use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use charla_agent::AgentDeps;

use crate::rate::PrincipalRateLimiter;

/// Central shared state - passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub deps: Arc<AgentDeps>,
    pub limiter: PrincipalRateLimiter,
    pub started: Instant,
}

impl AppState {
    pub fn new(deps: Arc<AgentDeps>) -> Self {
        let limiter = PrincipalRateLimiter::new(
            deps.config.rate_limit.max,
            std::time::Duration::from_secs(deps.config.rate_limit.window_secs),
        );
        Self {
            deps,
            limiter,
            started: Instant::now(),
        }
    }
}

/// Assemble the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/webhook", post(crate::http::webhook::webhook_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
