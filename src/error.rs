//! Error types for the reliability control plane

use std::io;

use thiserror::Error;

/// Result type alias for the reliability control plane
pub type Result<T> = std::result::Result<T, Error>;

/// Reliability control plane errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider was never registered with the optimizer
    #[error("Provider not registered: {0}")]
    ProviderNotRegistered(String),

    /// Provider blocked by an open circuit breaker
    #[error("Provider unavailable (circuit open): {0}")]
    CircuitOpen(String),

    /// Provider call rejected by the local rate limiter
    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    /// Provider call exceeded the tuned timeout
    #[error("Provider timeout: {provider} after {timeout_ms}ms")]
    ProviderTimeout {
        /// Provider id
        provider: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Provider call failed
    #[error("Provider call failed: {provider}: {message}")]
    ProviderCall {
        /// Provider id
        provider: String,
        /// Failure description from the adapter
        message: String,
        /// Whether another attempt may succeed
        retryable: bool,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider call failure
    pub fn provider_call(provider: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::ProviderCall {
            provider: provider.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether a retry of the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderTimeout { .. } | Self::Io(_) => true,
            Self::ProviderCall { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
