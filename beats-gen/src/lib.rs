//! beats-gen library interface
//!
//! Exposes modules for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod stores;
pub mod throttle;

use axum::{middleware, Router};
use beats_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::orchestrator::Orchestrator;
use crate::stores::{RateLimitPolicy, RateLimitStore, UserStore};
use crate::throttle::GenerationThrottle;

/// Request-handling policy derived from configuration
#[derive(Debug, Clone)]
pub struct ApiPolicy {
    /// Expose generation error details (script stderr) to clients
    pub development: bool,
    /// Failed-login limit per username
    pub login_limit: RateLimitPolicy,
    pub session_ttl: chrono::Duration,
    /// Entries returned by the generation history endpoint
    pub history_limit: u32,
}

impl Default for ApiPolicy {
    fn default() -> Self {
        Self {
            development: false,
            login_limit: RateLimitPolicy {
                max_attempts: 5,
                window: std::time::Duration::from_secs(15 * 60),
            },
            session_ttl: chrono::Duration::days(7),
            history_limit: 50,
        }
    }
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (generation history)
    pub db: SqlitePool,
    pub orchestrator: Arc<Orchestrator>,
    pub users: Arc<dyn UserStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub throttle: Arc<GenerationThrottle>,
    /// Event broadcaster for SSE
    pub event_bus: EventBus,
    pub policy: ApiPolicy,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        orchestrator: Orchestrator,
        users: Arc<dyn UserStore>,
        rate_limits: Arc<dyn RateLimitStore>,
        throttle: GenerationThrottle,
        event_bus: EventBus,
        policy: ApiPolicy,
    ) -> Self {
        Self {
            db,
            orchestrator: Arc::new(orchestrator),
            users,
            rate_limits,
            throttle: Arc::new(throttle),
            event_bus,
            policy,
            startup_time: Instant::now(),
        }
    }
}

/// Build application router
///
/// Routes behind the session middleware require `Authorization: Bearer`.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::session_routes())
        .merge(api::generate_routes())
        .merge(api::generation_history_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_session,
        ));

    Router::new()
        .merge(protected)
        .merge(api::account_routes())
        .merge(api::health_routes())
        .merge(api::event_routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}
