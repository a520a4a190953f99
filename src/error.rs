//! Error types for the stackplan engine.
//!
//! Errors are split by the stage that raises them. Configuration and graph
//! errors are build-time: they are returned before any remote call is made
//! and are always recoverable by fixing the declaration. Execution errors
//! happen mid-apply and carry the partial state snapshot that was committed
//! before the failure.

use std::path::PathBuf;
use thiserror::Error;

use crate::planner::ActionKind;
use crate::state::StateSnapshot;

/// The main error type for the stackplan engine.
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Declaration graph errors (duplicates, references, cycles).
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provisioning API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Execution error: {0}")]
    Execution(Box<ExecutionError>),

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
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
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

    /// A resource declares a kind the catalog does not know.
    #[error("Unknown resource kind '{kind}' for resource '{resource}'")]
    UnknownKind {
        /// Resource id.
        resource: String,
        /// The unrecognised kind tag.
        kind: String,
    },
}

/// Why a reference could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The referenced resource is not declared.
    MissingResource,
    /// The referenced resource's kind has no such output.
    UnknownOutput,
}

/// Errors raised while building the resource graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A logical id was registered twice in the same pass.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated logical id.
        id: String,
    },

    /// A property references a resource or output that does not exist.
    #[error("Unresolved reference in {resource}.{property}: ${{{target}.{output}}} ({reason})")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// Property path holding the reference.
        property: String,
        /// Referenced resource id.
        target: String,
        /// Referenced output name.
        output: String,
        /// What is missing.
        reason: UnresolvedReason,
    },

    /// An explicit ordering hint names an unknown resource.
    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// Resource declaring the hint.
        resource: String,
        /// The unknown dependency.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle {
        /// Node sequence of the cycle, first node repeated at the end.
        cycle: Vec<String>,
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

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
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

/// Provisioning API errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Provider API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("Provider API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Remote object not found.
    #[error("Remote resource not found: {remote_id}")]
    NotFound {
        /// Provider-assigned identifier.
        remote_id: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from provider API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A remote call exceeded the operation timeout.
    #[error("Timeout after {secs}s waiting for {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Timeout in seconds.
        secs: u64,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A saved plan no longer matches the state it was computed from.
    #[error("Saved plan is stale: planned against serial {planned} of lineage {lineage}, state is at serial {current}")]
    StalePlan {
        /// Serial the plan was computed against.
        planned: u64,
        /// Current state serial.
        current: u64,
        /// Lineage the plan was computed against.
        lineage: String,
    },

    /// A saved plan file could not be read or written.
    #[error("Plan file error: {message}")]
    PlanFile {
        /// Description of the problem.
        message: String,
    },

    /// The constraint graph used for ordering was not acyclic.
    #[error("Failed to order plan actions: {message}")]
    Ordering {
        /// Description of the ordering issue.
        message: String,
    },
}

/// Errors raised while applying a plan.
///
/// Every variant carries the snapshot as it was committed when execution
/// stopped. No rollback of already-applied actions is attempted.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A remote operation failed.
    #[error("{action} of '{resource_id}' failed: {cause}")]
    ActionFailed {
        /// Resource whose action failed.
        resource_id: String,
        /// The failed action.
        action: ActionKind,
        /// Underlying provider error.
        cause: ProviderError,
        /// Snapshot committed before the failure.
        snapshot: StateSnapshot,
    },

    /// Properties could not be resolved against the applied dependencies.
    #[error("Cannot resolve properties of '{resource_id}': {message}")]
    Unresolvable {
        /// Resource whose properties could not be resolved.
        resource_id: String,
        /// Description of the missing value.
        message: String,
        /// Snapshot committed before the failure.
        snapshot: StateSnapshot,
    },

    /// Persisting the snapshot after a successful remote operation failed.
    #[error("Failed to persist state after {action} of '{resource_id}': {message}")]
    PersistFailed {
        /// Resource whose result could not be persisted.
        resource_id: String,
        /// The action that succeeded remotely.
        action: ActionKind,
        /// Description of the storage failure.
        message: String,
        /// In-memory snapshot, including the unpersisted change.
        snapshot: StateSnapshot,
    },

    /// Persisting the snapshot after the last action failed.
    #[error("Failed to persist final state: {message}")]
    FinalizeFailed {
        /// Storage error.
        message: String,
        /// Snapshot with every action committed.
        snapshot: StateSnapshot,
    },

    /// Cancellation was requested; in-flight operations were allowed to finish.
    #[error("Apply cancelled after {completed} of {total} actions")]
    Cancelled {
        /// Actions completed before stopping.
        completed: usize,
        /// Actions in the plan.
        total: usize,
        /// Snapshot committed when execution stopped.
        snapshot: StateSnapshot,
    },
}

/// Result type alias for stackplan operations.
pub type Result<T> = std::result::Result<T, StackError>;

impl From<ExecutionError> for StackError {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(Box::new(err))
    }
}

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
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
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
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
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if the failure is transient and the call may be repeated
    /// for a kind whose operations are idempotent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::NetworkError { .. } | Self::Timeout { .. }
        )
    }
}

impl ExecutionError {
    /// Returns the snapshot committed when execution stopped.
    #[must_use]
    pub const fn snapshot(&self) -> &StateSnapshot {
        match self {
            Self::ActionFailed { snapshot, .. }
            | Self::Unresolvable { snapshot, .. }
            | Self::PersistFailed { snapshot, .. }
            | Self::FinalizeFailed { snapshot, .. }
            | Self::Cancelled { snapshot, .. } => snapshot,
        }
    }

    /// Consumes the error and returns the partial snapshot.
    #[must_use]
    pub fn into_snapshot(self) -> StateSnapshot {
        match self {
            Self::ActionFailed { snapshot, .. }
            | Self::Unresolvable { snapshot, .. }
            | Self::PersistFailed { snapshot, .. }
            | Self::FinalizeFailed { snapshot, .. }
            | Self::Cancelled { snapshot, .. } => snapshot,
        }
    }
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingResource => write!(f, "no such resource"),
            Self::UnknownOutput => write!(f, "no such output for this kind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::Cycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_unresolved_reference_message() {
        let err = GraphError::UnresolvedReference {
            resource: String::from("cdn"),
            property: String::from("origin_domain_name"),
            target: String::from("bucket"),
            output: String::from("nope"),
            reason: UnresolvedReason::UnknownOutput,
        };
        let message = err.to_string();
        assert!(message.contains("cdn.origin_domain_name"));
        assert!(message.contains("${bucket.nope}"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::network("reset").is_transient());
        assert!(ProviderError::Timeout { operation: String::from("create"), secs: 5 }.is_transient());
        assert!(!ProviderError::api_error(400, "bad").is_transient());
        assert!(!ProviderError::NotFound { remote_id: String::from("x") }.is_transient());
    }
}
