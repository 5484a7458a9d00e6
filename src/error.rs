//! Error types for the edgeweave engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, planning, state management,
//! provider calls, and apply.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for edgeweave.
#[derive(Debug, Error)]
pub enum EdgeweaveError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while turning declarations into a resource graph.
///
/// All of these reject the run before the provider is touched.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The same `kind.name` was declared more than once.
    #[error("Duplicate resource declaration: {address}")]
    DuplicateResource {
        /// The duplicated address.
        address: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference '{expression}' in {from}: {reason}")]
    InvalidReference {
        /// Resource holding the expression.
        from: String,
        /// The offending expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A reference targets a resource that is not declared.
    #[error("Unresolved reference in {from}: {target} is not declared")]
    UnresolvedReference {
        /// Resource holding the reference.
        from: String,
        /// Address that could not be found.
        target: String,
    },

    /// References form a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    Cycle {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another run.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The lock this run held was released or taken over by another run.
    #[error("State lock {lock_id} is no longer held by this run")]
    LockLost {
        /// Identifier of the lost lock.
        lock_id: String,
    },

    /// Storage backend error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider asked us to slow down.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider is temporarily unavailable (5xx).
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// Network error talking to the provider.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The provider rejected the request.
    #[error("Provider rejected request: {status} - {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The resource does not exist on the provider side.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Address or provider id of the missing resource.
        resource: String,
    },

    /// The provider returned something we could not interpret.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// Transient errors persisted past the retry budget.
    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error seen.
        last_error: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Guardrails refused the plan.
    #[error("Plan violates guardrails: {violations}")]
    GuardrailViolation {
        /// Joined list of violations.
        violations: String,
    },

    /// Plan actions reference each other inconsistently.
    #[error("Inconsistent plan: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A reference could not be interpolated at apply time.
    #[error("Cannot resolve {reference} for {address}: output not available")]
    OutputUnavailable {
        /// Resource being applied.
        address: String,
        /// The reference that could not be resolved.
        reference: String,
    },

    /// The action lacks data required to run it.
    #[error("Cannot apply {address}: {reason}")]
    MissingData {
        /// Resource being applied.
        address: String,
        /// What is missing.
        reason: String,
    },

    /// The run was aborted before any provider call.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for edgeweave operations.
pub type Result<T> = std::result::Result<T, EdgeweaveError>;

impl EdgeweaveError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. }
                    | ProviderError::Unavailable { .. }
                    | ProviderError::Network { .. }
            )
        )
    }

    /// Returns the delay the provider asked for, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// Returns true if this error means the remote resource is already gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }

    /// Returns true if this error is a lock conflict with another run.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockedByOther { .. } | StateError::LockLost { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rate_limited = EdgeweaveError::Provider(ProviderError::RateLimited {
            retry_after_secs: 3,
        });
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after_secs(), Some(3));

        let rejected = EdgeweaveError::Provider(ProviderError::rejected(400, "bad ttl"));
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.retry_after_secs(), None);

        let cycle = EdgeweaveError::Graph(GraphError::Cycle {
            cycle: String::from("url_map.a -> url_map.a"),
        });
        assert!(!cycle.is_retryable());
    }

    #[test]
    fn test_conflict_and_not_found() {
        let conflict = EdgeweaveError::State(StateError::LockedByOther {
            holder: String::from("ci-42"),
            since: String::from("2026-01-01T00:00:00Z"),
        });
        assert!(conflict.is_conflict());
        assert!(conflict.to_string().contains("ci-42"));

        let gone = EdgeweaveError::Provider(ProviderError::NotFound {
            resource: String::from("dns_record_set.www"),
        });
        assert!(gone.is_not_found());
    }
}
