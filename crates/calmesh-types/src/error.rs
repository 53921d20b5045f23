//! Error types for CalMesh
//!
//! All actor operations return explicit `Result` values; failures are never
//! swallowed silently. Queue consumers translate these into ack (permanent)
//! or retry (transient) decisions via [`CalError::is_retriable`].

use thiserror::Error;

/// Result type for CalMesh operations
pub type Result<T> = std::result::Result<T, CalError>;

/// CalMesh error types
#[derive(Debug, Clone, Error)]
pub enum CalError {
    /// Actor has no stored credentials
    #[error("no stored credentials for this account")]
    NoTokens,

    /// Provider refused a token refresh. 4xx is permanent, 5xx retryable.
    #[error("token refresh failed with status {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    /// Any envelope decrypt failure; monitored and alertable
    #[error("token envelope decrypt failed")]
    CryptoFailure,

    /// Watch channel not found
    #[error("watch channel {channel_id} not found")]
    ChannelNotFound { channel_id: String },

    /// Microsoft Graph subscription not found
    #[error("subscription {subscription_id} not found")]
    SubscriptionNotFound { subscription_id: String },

    /// Session or hold state machine violation
    #[error("invalid transition: {detail}")]
    InvalidTransition { detail: String },

    /// Unknown canonical, session, candidate, policy, or VIP
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Request constraint violation
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Provider API failure, passed through for consumer retry decisions
    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    /// Storage layer failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CalError {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an invalid-transition error
    pub fn invalid_transition(detail: impl Into<String>) -> Self {
        Self::InvalidTransition {
            detail: detail.into(),
        }
    }

    /// Whether a queue consumer should retry after this error
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Storage(_) => true,
            Self::RefreshFailed { status, .. } => *status >= 500,
            Self::Provider { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get an error code for API responses and structured logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoTokens => "NO_TOKENS",
            Self::RefreshFailed { .. } => "REFRESH_FAILED",
            Self::CryptoFailure => "CRYPTO_FAILURE",
            Self::ChannelNotFound { .. } => "CHANNEL_NOT_FOUND",
            Self::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for CalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CalError::not_found("session", "ses_x");
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "session ses_x not found");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(CalError::Provider {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(CalError::Provider {
            status: 429,
            body: String::new()
        }
        .is_retriable());
        assert!(!CalError::Provider {
            status: 404,
            body: String::new()
        }
        .is_retriable());
        assert!(!CalError::RefreshFailed {
            status: 400,
            body: "invalid_grant".into()
        }
        .is_retriable());
        assert!(!CalError::CryptoFailure.is_retriable());
    }
}
