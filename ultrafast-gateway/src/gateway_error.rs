//! # Gateway Error Types Module
//!
//! This module defines the comprehensive error types for the Ultrafast Gateway,
//! providing standardized error handling and HTTP response mapping for all
//! gateway operations.
//!
//! ## Overview
//!
//! The error system provides:
//! - **Standardized Error Types**: Consistent error patterns across the gateway
//! - **HTTP Response Mapping**: Automatic conversion to appropriate HTTP status codes
//! - **Error Context**: Rich error information for debugging and monitoring
//! - **Error Propagation**: Proper error handling throughout the application
//! - **Client-Friendly Messages**: User-friendly error messages
//!
//! ## Error Categories
//!
//! The gateway defines several error categories:
//!
//! ### Client Errors
//! Errors originating from the client SDK:
//! - **Core Errors**: the routing/resilience core's closed taxonomy, wrapped
//!   via `ClientError::Core` and mapped status-by-status (see below)
//! - **Rate Limit Errors**: Request or token limit violations
//! - **Invalid Request Errors**: Malformed or invalid requests
//! - **Network Errors**: Connection and communication failures
//!
//! ### Provider Errors
//! Errors from AI/LLM providers:
//! - **API Key Errors**: Invalid provider API keys
//! - **Rate Limit Errors**: Provider-specific rate limits
//! - **Quota Errors**: Provider quota exceeded
//! - **Model Errors**: Unsupported or unavailable models
//! - **Service Errors**: Provider service unavailability
//!
//! ### Gateway Errors
//! Internal gateway errors:
//! - **Rate Limit Errors**: Gateway rate limiting
//! - **Content Filtering**: Content moderation failures
//! - **Configuration Errors**: Invalid gateway configuration
//!
//! ## HTTP Status Code Mapping
//!
//! Errors are automatically mapped to appropriate HTTP status codes:
//!
//! - **400 Bad Request**: Invalid requests and malformed data
//! - **402 Payment Required**: Budget exceeded
//! - **429 Too Many Requests**: Rate limit violations
//! - **500 Internal Server Error**: Internal gateway errors
//! - **502/503/504**: Provider and service unavailability, per the core's
//!   transient/circuit-open/timeout distinctions
//!
//! ## Usage
//!
//! ```rust
//! use ultrafast_gateway::gateway_error::GatewayError;
//!
//! let rate_limit_error = GatewayError::RateLimit {
//!     message: "Rate limit exceeded".to_string(),
//! };
//!
//! // Errors automatically convert to HTTP responses
//! let response = rate_limit_error.into_response();
//! ```
//!
//! ## Error Handling
//!
//! The error system integrates with Axum for automatic HTTP response generation:
//!
//! ```rust
//! use axum::{Json, extract::State};
//! use ultrafast_gateway::gateway_error::GatewayError;
//!
//! async fn handler() -> Result<Json<Value>, GatewayError> {
//!     // Your handler logic here
//!     if some_condition {
//!         return Err(GatewayError::InvalidRequest {
//!             message: "missing field".to_string(),
//!         });
//!     }
//!     Ok(Json(json!({"status": "success"})))
//! }
//! ```
//!
//! ## Error Context
//!
//! Each error includes context for debugging and monitoring:
//!
//! - **Error Type**: Categorized error type for filtering
//! - **Error Message**: Human-readable error description
//! - **HTTP Status**: Appropriate HTTP status code
//! - **Error Code**: Machine-readable error identifier
//! - **Timestamp**: When the error occurred
//! - **Request ID**: Associated request identifier

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use ultrafast_models_sdk::error::{ClientError, CoreError, ProviderError};

/// Comprehensive error types for the Ultrafast Gateway.
///
/// This enum defines all possible error types that can occur in the gateway,
/// including client errors, provider errors, and internal gateway errors.
/// Each error variant includes appropriate error messages and can be
/// automatically converted to HTTP responses.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Errors originating from the client SDK
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Errors from AI/LLM providers
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid or malformed request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Rate limiting and quota violation errors
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    /// Content filtering and moderation errors
    #[error("Content filtered: {message}")]
    ContentFiltered { message: String },

    /// Internal gateway server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// Service unavailability errors
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Configuration and setup errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maps a [`CoreError`] onto an HTTP status, retryability, and a
/// caller-facing `Retry-After` hint.
///
/// Status/code are a direct transcription of the routing/resilience core's
/// closed error taxonomy: terminal validation and not-found kinds surface
/// as 4xx, everything the Coordinator considers retryable surfaces as a
/// 5xx (or 429 for rate limiting) carrying a `Retry-After` where the core
/// supplied one, and `Cancelled` uses the non-standard 499 client-closed
/// convention so it isn't mistaken for a server failure.
fn core_error_status(err: &CoreError) -> (StatusCode, &'static str, Option<std::time::Duration>) {
    match err {
        CoreError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_failed", None),
        CoreError::NotSupported { .. } => (StatusCode::NOT_FOUND, "not_supported", None),
        CoreError::BudgetExceeded { .. } => {
            (StatusCode::PAYMENT_REQUIRED, "budget_exceeded", None)
        }
        CoreError::AllProvidersUnhealthy { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "all_providers_unhealthy",
            None,
        ),
        CoreError::ModelNotSupported { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "model_not_supported", None)
        }
        CoreError::BulkheadRejection { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "bulkhead_rejection",
            Some(std::time::Duration::from_millis(100)),
        ),
        CoreError::CircuitOpen { retry_after, .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "circuit_open", Some(*retry_after))
        }
        CoreError::RateLimited { retry_after, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            *retry_after,
        ),
        CoreError::ProviderTransient { .. } => {
            (StatusCode::BAD_GATEWAY, "provider_transient", None)
        }
        CoreError::ProviderPermanent { .. } => {
            (StatusCode::BAD_GATEWAY, "provider_permanent", None)
        }
        CoreError::ProviderTimeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "provider_timeout", None)
        }
        CoreError::GatewayTimeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", None)
        }
        CoreError::Cancelled => (StatusCode::from_u16(499).unwrap(), "cancelled", None),
        CoreError::InvalidResponse { .. } => {
            (StatusCode::BAD_GATEWAY, "invalid_provider_response", None)
        }
        CoreError::Internal { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Client(ClientError::Core(core_err)) = &self {
            let (status, error_type, retry_after) = core_error_status(core_err);
            if status.as_u16() == 499 {
                return status.into_response();
            }
            let mut response = (
                status,
                Json(json!({
                    "error": {
                        "message": core_err.to_string(),
                        "type": error_type,
                        "code": status.as_u16()
                    }
                })),
            )
                .into_response();
            if let Some(delay) = retry_after {
                if let Ok(value) = HeaderValue::from_str(&delay.as_secs().to_string()) {
                    response.headers_mut().insert("retry-after", value);
                }
            }
            return response;
        }

        let (status, error_message, error_type) = match &self {
            GatewayError::Client(e) => match e {
                ClientError::Authentication { .. } => (
                    StatusCode::UNAUTHORIZED,
                    self.to_string(),
                    "authentication_error",
                ),
                ClientError::RateLimit => (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    "rate_limit_error",
                ),
                ClientError::InvalidRequest { .. } => {
                    (StatusCode::BAD_REQUEST, self.to_string(), "invalid_request")
                }
                ClientError::Core(_) => unreachable!("handled above"),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.to_string(),
                    "client_error",
                ),
            },
            GatewayError::Provider(e) => match e {
                ProviderError::InvalidApiKey => (
                    StatusCode::UNAUTHORIZED,
                    self.to_string(),
                    "invalid_api_key",
                ),
                ProviderError::RateLimit => (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    "provider_rate_limit",
                ),
                ProviderError::QuotaExceeded => (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    "quota_exceeded",
                ),
                ProviderError::ModelNotFound { .. } => {
                    (StatusCode::NOT_FOUND, self.to_string(), "model_not_found")
                }
                ProviderError::ServiceUnavailable => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    self.to_string(),
                    "service_unavailable",
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.to_string(),
                    "provider_error",
                ),
            },
            GatewayError::RateLimit { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                self.to_string(),
                "rate_limit_error",
            ),
            GatewayError::InvalidRequest { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string(), "invalid_request")
            }
            GatewayError::ContentFiltered { .. } => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "content_filtered",
            ),
            GatewayError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                "service_unavailable",
            ),
            GatewayError::Config { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.to_string(),
                "configuration_error",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.to_string(),
                "internal_error",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}
