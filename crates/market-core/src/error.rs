//! # Market Error Types
//!
//! Typed error handling for the template-market payment pipeline.
//! All fallible operations return `Result<T, MarketError>`.

use thiserror::Error;

/// Core error type for checkout, fulfillment and ledger operations
#[derive(Debug, Error)]
pub enum MarketError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad input, unavailable or already-owned item, invalid coupon
    #[error("{0}")]
    Validation(String),

    /// Caller identity is missing
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller may not act on this resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A pending withdrawal already exists for this creator
    #[error("You already have a pending withdrawal")]
    DuplicatePendingWithdrawal,

    /// State machine refused the transition
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Storage layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn validation(message: impl Into<String>) -> Self {
        MarketError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MarketError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns true if the caller (or webhook sender) should retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::NetworkError(_)
                | MarketError::ProviderError { .. }
                | MarketError::Storage(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MarketError::Configuration(_) => 500,
            MarketError::Validation(_) => 400,
            MarketError::Unauthenticated => 401,
            MarketError::Forbidden(_) => 403,
            MarketError::NotFound { .. } => 404,
            MarketError::DuplicatePendingWithdrawal => 409,
            MarketError::InvalidTransition { .. } => 409,
            MarketError::ProviderError { .. } => 502,
            MarketError::NetworkError(_) => 503,
            MarketError::WebhookVerificationFailed(_) => 400,
            MarketError::WebhookParseError(_) => 400,
            MarketError::Storage(_) => 500,
            MarketError::Serialization(_) => 500,
            MarketError::Internal(_) => 500,
        }
    }
}

/// Result type alias for market operations
pub type MarketResult<T> = Result<T, MarketError>;
