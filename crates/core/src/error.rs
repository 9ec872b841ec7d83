//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants). Storage failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Prefix the message with the name of the field it concerns.
    ///
    /// Used by composite validators (`created_at: both bounds are missing`).
    pub fn in_field(self, field: &str) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(format!("{field}: {msg}")),
            Self::InvariantViolation(msg) => Self::InvariantViolation(format!("{field}: {msg}")),
            Self::InvalidId(msg) => Self::InvalidId(format!("{field}: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_field_prefixes_message_and_keeps_kind() {
        let err = DomainError::validation("both bounds are missing").in_field("created_at");
        assert_eq!(
            err,
            DomainError::Validation("created_at: both bounds are missing".to_string())
        );
        assert_eq!(
            err.to_string(),
            "validation failed: created_at: both bounds are missing"
        );
    }
}
