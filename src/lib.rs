//! TG Token Relay - a minimal relay service
//!
//! Accepts inbound HTTP requests, looks up per-user credential records
//! loaded from a remotely-fetched configuration document, and forwards
//! requests to two fixed upstream APIs:
//! - One-shot remote configuration load at startup
//! - Token fetch and search forwarding endpoints
//! - Prometheus metrics
//! - Health checks

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;

pub use config::ConfigSnapshot;
pub use server::{build_router, AppState};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
