//! Provider error types

use thiserror::Error;

/// Errors returned by resource providers.
///
/// `Throttled`, `Timeout` and `Unavailable` are transient: the executor
/// retries them with backoff. Everything else is permanent and fails the
/// operation on first occurrence.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    Throttled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("API error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_)
                | ProviderError::Timeout(_)
                | ProviderError::Unavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Throttled("slow down".into()).is_transient());
        assert!(ProviderError::Timeout("30s".into()).is_transient());
        assert!(ProviderError::Unavailable("maintenance".into()).is_transient());

        assert!(!ProviderError::Validation("bad cidr".into()).is_transient());
        assert!(!ProviderError::Conflict("name taken".into()).is_transient());
        assert!(!ProviderError::NotFound("vpc-000001".into()).is_transient());
        assert!(!ProviderError::UnsupportedType("quantum-tunnel".into()).is_transient());
        assert!(!ProviderError::Api("500".into()).is_transient());
    }
}
