//! Payments Reliability Control Plane
//!
//! Keeps a multi-provider payment integration healthy under provider
//! outages, latency spikes and load surges.
//!
//! # Components
//!
//! - **Health Monitor**: aggregates provider check results
//! - **Circuit Breakers**: isolate failing providers with backed-off cooldowns
//! - **Audit Ledger**: append-only, SHA-256 hash-chained action log
//! - **Auto-Optimizer**: tunes timeout, retries, rate limit and cache TTL
//! - **Predictive Maintenance**: forecasts failures from error-rate trends
//! - **Auto-Scaler**: sizes the instance pool from load, schedules and forecasts
//!
//! All components share one [`context::ReliabilityContext`]; the
//! [`plane::ReliabilityPlane`] builds and runs them together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod failsafe;
pub mod load;
pub mod optimizer;
pub mod outcomes;
pub mod plane;
pub mod predictive;
pub mod scaling;
pub mod scheduler;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` of `"json"` selects
/// structured output; anything else is human-readable text.
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("tracing setup failed: {e}")))
}
