//! # Error Handling Module
//!
//! This module provides the error taxonomy for the routing and resilience
//! core: a small, closed set of error *kinds* that every layer (adapters,
//! circuit breaker, bulkhead, router, coordinator) maps its failures onto,
//! plus the legacy client/provider error enums used by the standalone SDK
//! surface and the existing provider adapters.
//!
//! ## Overview
//!
//! - **ClientError**: high-level client operation errors.
//! - **ProviderError**: provider-specific API and communication errors.
//! - **CoreError**: the unified taxonomy described by the routing/resilience
//!   core (§7): each variant carries a `retryable` classification and, where
//!   applicable, a `retry_after` hint used by the Coordinator's backoff.
//! - **ResilienceError**: errors raised by the circuit breaker and bulkhead
//!   themselves, independent of the wrapped operation's error type.

use std::time::Duration;
use thiserror::Error;

/// High-level client operation errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Wrapped provider-specific errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// HTTP client and network communication errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid or missing configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Provider routing and selection errors
    #[error("Routing error: {message}")]
    Routing { message: String },

    /// Request timeout errors
    #[error("Timeout error")]
    Timeout,

    /// Rate limit exceeded errors
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Authentication and authorization failures
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Invalid or malformed request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Network connectivity and communication errors
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// A request was rejected or failed inside the routing/resilience core
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Provider-specific API and communication errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP client and network communication errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider API-specific errors with status code and message
    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Invalid or missing API key errors
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested model not found or unsupported
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    /// Rate limit exceeded for this provider
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider quota exceeded
    #[error("Quota exceeded")]
    QuotaExceeded,

    /// Provider service temporarily unavailable
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Request timeout errors
    #[error("Timeout")]
    Timeout,

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or malformed response format
    #[error("Invalid response format")]
    InvalidResponse,

    /// Invalid or missing provider configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unsupported provider type
    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    /// Unsupported feature for this provider
    #[error("Feature not supported: {feature}")]
    FeatureNotSupported { feature: String },

    /// Authentication and authorization failures
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Request validation failures
    #[error("Request validation failed: {field} - {message}")]
    ValidationError { field: String, message: String },

    /// Network connectivity and communication errors
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// Retryable errors that can be attempted again
    #[error("Retryable error: {message}")]
    RetryableError { message: String },

    /// 429 with a provider-supplied `Retry-After`, attributed to `provider_id`.
    #[error("rate limited by {provider_id}")]
    RateLimitedWithRetryAfter {
        provider_id: String,
        retry_after: Option<Duration>,
    },
}

impl ProviderError {
    /// Whether the Coordinator should consider retrying after this error.
    ///
    /// Mirrors the retry-eligibility rules in the core error taxonomy:
    /// network/timeout/5xx/429 are retryable, 4xx (other than 429) and
    /// malformed responses are not.
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Api { code, .. } => *code >= 500 || *code == 429,
            ProviderError::RateLimit | ProviderError::RateLimitedWithRetryAfter { .. } => true,
            ProviderError::ServiceUnavailable => true,
            ProviderError::Timeout => true,
            ProviderError::NetworkError { .. } => true,
            ProviderError::RetryableError { .. } => true,
            ProviderError::InvalidApiKey
            | ProviderError::ModelNotFound { .. }
            | ProviderError::QuotaExceeded
            | ProviderError::Serialization(_)
            | ProviderError::InvalidResponse
            | ProviderError::Configuration { .. }
            | ProviderError::ProviderNotSupported { .. }
            | ProviderError::FeatureNotSupported { .. }
            | ProviderError::AuthenticationFailed { .. }
            | ProviderError::ValidationError { .. } => false,
        }
    }

    /// Provider-supplied `Retry-After`, when this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimitedWithRetryAfter { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The routing/resilience core's closed error taxonomy (spec §7).
///
/// Every kind is either terminal (surfaced to the caller as-is) or
/// retryable (the Coordinator may re-enter the Router). `CoreError` is the
/// type that flows through `Router`, `Coordinator`, `CircuitBreaker`, and
/// `Bulkhead` — adapters produce `ProviderError` and the Coordinator lifts
/// it into a `CoreError` variant at the boundary, attaching the provider id
/// the adapter was called for.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Malformed or out-of-range `UnifiedRequest`. Never retried.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Unknown model or missing required capability. Never retried.
    #[error("not supported: {message}")]
    NotSupported { message: String },

    /// Per-request cost budget denies all candidates.
    #[error("budget exceeded: estimated cost {estimated_cost:.4} exceeds budget {budget:.4}")]
    BudgetExceeded { estimated_cost: f64, budget: f64 },

    /// Every candidate for this model was filtered out by health/circuit state.
    #[error("all providers unhealthy for model {model}")]
    AllProvidersUnhealthy { model: String },

    /// No candidates are registered for the requested (aliased) model.
    #[error("model not supported: {model}")]
    ModelNotSupported { model: String },

    /// The bulkhead could not grant a permit within `max_wait`.
    #[error("bulkhead rejected request to {provider_id} ({in_flight}/{max_concurrent} in flight)")]
    BulkheadRejection {
        provider_id: String,
        in_flight: usize,
        max_concurrent: usize,
    },

    /// The circuit breaker for `provider_id` is open.
    #[error("circuit open for {provider_id}, retry after {retry_after:?}")]
    CircuitOpen {
        provider_id: String,
        retry_after: Duration,
    },

    /// The provider returned 429.
    #[error("rate limited by {provider_id}, retry after {retry_after:?}")]
    RateLimited {
        provider_id: String,
        retry_after: Option<Duration>,
    },

    /// 5xx, network error, DNS/TLS failure, or a partial stream.
    #[error("transient provider error from {provider_id}: {message}")]
    ProviderTransient { provider_id: String, message: String },

    /// 400/401/403/404/422 from the backend, or an unparseable response.
    #[error("permanent provider error from {provider_id}: {message}")]
    ProviderPermanent { provider_id: String, message: String },

    /// The attempt exceeded its derived per-provider timeout budget.
    #[error("provider timeout for {provider_id} after {elapsed:?}")]
    ProviderTimeout {
        provider_id: String,
        elapsed: Duration,
    },

    /// The request's gateway-level deadline was exceeded. Terminal.
    #[error("gateway deadline exceeded after {elapsed:?}")]
    GatewayTimeout { elapsed: Duration },

    /// Client disconnect or deadline expiry during a suspension point.
    #[error("request cancelled")]
    Cancelled,

    /// A normalized response failed a §3 invariant (e.g. usage totals).
    #[error("invalid response from {provider_id}: {message}")]
    InvalidResponse { provider_id: String, message: String },

    /// Invariant violation, lock poisoning, or other programmer-facing bug.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Whether the Coordinator may attempt a retry for this error, subject
    /// to remaining gateway budget and retry-budget permits.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::AllProvidersUnhealthy { .. }
                | CoreError::BulkheadRejection { .. }
                | CoreError::CircuitOpen { .. }
                | CoreError::RateLimited { .. }
                | CoreError::ProviderTransient { .. }
                | CoreError::ProviderTimeout { .. }
        )
    }

    /// A minimum delay the Coordinator should honor before the next retry,
    /// if the error carries a provider- or breaker-supplied hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            CoreError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The provider this error is attributed to, if any.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            CoreError::BulkheadRejection { provider_id, .. }
            | CoreError::CircuitOpen { provider_id, .. }
            | CoreError::RateLimited { provider_id, .. }
            | CoreError::ProviderTransient { provider_id, .. }
            | CoreError::ProviderPermanent { provider_id, .. }
            | CoreError::ProviderTimeout { provider_id, .. }
            | CoreError::InvalidResponse { provider_id, .. } => Some(provider_id),
            _ => None,
        }
    }

    /// Lift an adapter-level [`ProviderError`] into a `CoreError`, attributing
    /// it to `provider_id`. This is the boundary conversion the Coordinator
    /// performs after every adapter call (spec §7 "the adapter classifies at
    /// the boundary").
    pub fn from_provider_error(provider_id: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimitedWithRetryAfter { retry_after, .. } => CoreError::RateLimited {
                provider_id: provider_id.to_string(),
                retry_after,
            },
            ProviderError::Api { code, .. } if code == 429 => CoreError::RateLimited {
                provider_id: provider_id.to_string(),
                retry_after: None,
            },
            ProviderError::Api { code, message } if code >= 500 => CoreError::ProviderTransient {
                provider_id: provider_id.to_string(),
                message,
            },
            ProviderError::Api { message, .. } => CoreError::ProviderPermanent {
                provider_id: provider_id.to_string(),
                message,
            },
            ProviderError::Timeout => CoreError::ProviderTimeout {
                provider_id: provider_id.to_string(),
                elapsed: Duration::ZERO,
            },
            ProviderError::RateLimit => CoreError::RateLimited {
                provider_id: provider_id.to_string(),
                retry_after: None,
            },
            ProviderError::ServiceUnavailable
            | ProviderError::Http(_)
            | ProviderError::NetworkError { .. }
            | ProviderError::RetryableError { .. } => CoreError::ProviderTransient {
                provider_id: provider_id.to_string(),
                message: err.to_string(),
            },
            ProviderError::ValidationError { field, message } => CoreError::Validation {
                message: format!("{field}: {message}"),
            },
            ProviderError::InvalidResponse | ProviderError::Serialization(_) => {
                CoreError::InvalidResponse {
                    provider_id: provider_id.to_string(),
                    message: err.to_string(),
                }
            }
            ProviderError::InvalidApiKey
            | ProviderError::ModelNotFound { .. }
            | ProviderError::QuotaExceeded
            | ProviderError::Configuration { .. }
            | ProviderError::ProviderNotSupported { .. }
            | ProviderError::FeatureNotSupported { .. }
            | ProviderError::AuthenticationFailed { .. } => CoreError::ProviderPermanent {
                provider_id: provider_id.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Errors raised directly by a resilience primitive (circuit breaker,
/// bulkhead), independent of the wrapped operation's own error type `E`.
#[derive(Error, Debug, Clone)]
pub enum ResilienceError<E> {
    /// The operation exceeded its derived timeout budget.
    #[error("operation timed out after {elapsed:?} (budget {budget:?})")]
    Timeout { elapsed: Duration, budget: Duration },

    /// The bulkhead rejected the operation due to capacity.
    #[error("bulkhead rejected ({in_flight} in flight, max {max})")]
    Bulkhead { in_flight: usize, max: usize },

    /// The circuit breaker is open.
    #[error("circuit open ({failure_count} failures, open for {open_duration:?})")]
    CircuitOpen {
        failure_count: usize,
        open_duration: Duration,
    },

    /// The underlying operation failed.
    #[error("inner operation failed")]
    Inner(E),
}
