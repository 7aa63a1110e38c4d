//! Core error taxonomy.
//!
//! Every operation the core exposes resolves to one of these variants.
//! The access mediator is the single funnel that translates backend
//! failures into this taxonomy and records audit before surfacing them.

use crate::resolver::ResolverError;

/// Error type for core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The named object/link/action/policy/version does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The policy engine denied the operation; carries the decision reason.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Shape or validation failure (schema document, clip request, filter).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The resolver's underlying store failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Duplicate version, concurrent publish, or index write collision.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A suspension point exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Anything unexpected; logged, never suppressed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap any store error as a backend error, preserving its message.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// Short machine-readable code for audit records and API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Backend(_) => "backend_error",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ResolverError> for CoreError {
    fn from(e: ResolverError) -> Self {
        Self::Backend(e.to_string())
    }
}
