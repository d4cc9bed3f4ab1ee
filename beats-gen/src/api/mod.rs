//! HTTP API handlers for beats-gen
//!
//! REST endpoints for accounts and generation jobs, plus an SSE stream of
//! generation lifecycle events.

pub mod auth;
pub mod events;
pub mod generate;
pub mod generations;
pub mod health;

pub use auth::{account_routes, session_routes, AuthUser};
pub use events::event_routes;
pub use generate::generate_routes;
pub use generations::generation_history_routes;
pub use health::health_routes;
