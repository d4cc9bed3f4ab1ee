//! # Burnt Beats Common Library
//!
//! Shared code for the Burnt Beats services including:
//! - Error and Result types
//! - Bootstrap configuration loading (TOML + root folder resolution)
//! - Logging initialization
//! - Generation event types and the broadcast EventBus
//! - Credential hashing and session token helpers
//! - SSE utilities

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod security;
pub mod sse;

pub use error::{Error, Result};
