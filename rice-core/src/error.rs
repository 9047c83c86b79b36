//! Error types for the Rice system.

/// Result type alias for Rice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Rice system.
///
/// Variants map one-to-one onto the error kinds the HTTP layer exposes;
/// every component propagates these rather than inventing local taxonomies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input: bad field, oversize payload, out-of-range value
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A named resource does not exist
    #[error("Not found: {resource} '{id}'")]
    NotFound { resource: String, id: String },

    /// Resource already exists or is immutable
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Reserved for a future auth layer
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Reserved for a future auth layer
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller should back off and retry later
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Deadline expired before the operation completed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The caller's cancellation context fired
    #[error("Operation canceled: {0}")]
    Canceled(String),

    /// A bounded queue or channel is full
    #[error("Backpressure: {0}")]
    Backpressure(String),

    /// A dependency (vector DB, bus) is unreachable or closed
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// An ML head is not loaded or failed to initialize
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors; details stay server-side
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new canceled error
    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::Canceled(msg.into())
    }

    /// Create a new backpressure error
    pub fn backpressure(msg: impl Into<String>) -> Self {
        Self::Backpressure(msg.into())
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new model-not-available error
    pub fn model_not_available(msg: impl Into<String>) -> Self {
        Self::ModelNotAvailable(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a cancellation error
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    /// Whether a transient retry may succeed.
    ///
    /// Validation, not-found and conflict errors are final; timeouts,
    /// backpressure and unavailability are worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Backpressure(_) | Self::Unavailable(_) | Self::RateLimited(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_and_predicates() {
        let err = Error::not_found("store", "missing");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = Error::validation("query must not be empty");
        assert!(err.is_validation());

        let err = Error::unavailable("qdrant unreachable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::not_found("store", "docs");
        assert_eq!(err.to_string(), "Not found: store 'docs'");
    }
}
