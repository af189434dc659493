//! Prompt gateway library
//!
//! Exposes modules for integration testing

pub mod admission;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod providers;
pub mod server;

// Re-export commonly used types for external use
pub use admission::{AdmissionController, QuotaLimits, UsageStore};
pub use config::GatewayConfig;
pub use server::{build_router, GatewayState};
