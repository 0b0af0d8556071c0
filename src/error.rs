//! Error types for the fleet planner.
//!
//! This module provides the error hierarchy for every stage of a planning
//! pass: manifest loading, persisted state, instance repository lookups and
//! plan computation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the fleet planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Manifest-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persisted state errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Plan computation errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Instance repository errors.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Manifest-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (instance group, vm type, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A named reference does not resolve to a manifest entry.
    #[error("Instance group '{instance_group}' references unknown {kind} '{name}'")]
    UnknownReference {
        /// Kind of the referenced entry.
        kind: String,
        /// The unresolved name.
        name: String,
        /// Instance group holding the reference.
        instance_group: String,
    },
}

/// Persisted state errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Snapshot file not found.
    #[error("State snapshot not found: {path}")]
    NotFound {
        /// Path to the missing snapshot.
        path: PathBuf,
    },

    /// Snapshot is corrupted.
    #[error("State snapshot is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Snapshot belongs to another deployment.
    #[error("State snapshot belongs to deployment '{found}', expected '{expected}'")]
    DeploymentMismatch {
        /// Deployment named by the manifest.
        expected: String,
        /// Deployment named by the snapshot.
        found: String,
    },

    /// Snapshot version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected snapshot version.
        expected: String,
        /// Found snapshot version.
        found: String,
    },
}

/// Plan computation errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The instance has no persisted model bound to it.
    #[error("Instance `{instance}' model is not bound")]
    ModelNotBound {
        /// Name of the offending instance.
        instance: String,
    },
}

/// Instance repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository has no instance group with this name.
    #[error("Unknown instance group: {name}")]
    UnknownInstanceGroup {
        /// Name of the instance group.
        name: String,
    },

    /// The availability zone is not declared in the deployment.
    #[error("Unknown availability zone '{az}' for instance {instance}")]
    UnknownAvailabilityZone {
        /// Name of the availability zone.
        az: String,
        /// Instance referencing it.
        instance: String,
    },

    /// The lookup backend failed.
    #[error("Instance lookup failed for {instance}: {message}")]
    LookupFailed {
        /// Instance being looked up.
        instance: String,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;

impl PlannerError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error is a violated plan precondition.
    #[must_use]
    pub const fn is_precondition_violation(&self) -> bool {
        matches!(self, Self::Plan(PlanError::ModelNotBound { .. }))
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

    /// Creates an unresolved reference error.
    #[must_use]
    pub fn unknown_reference(
        kind: impl Into<String>,
        name: impl Into<String>,
        instance_group: impl Into<String>,
    ) -> Self {
        Self::UnknownReference {
            kind: kind.into(),
            name: name.into(),
            instance_group: instance_group.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl PlanError {
    /// Creates an unbound model error for the named instance.
    #[must_use]
    pub fn model_not_bound(instance: impl Into<String>) -> Self {
        Self::ModelNotBound {
            instance: instance.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_bound_message_names_instance() {
        let err = PlannerError::from(PlanError::model_not_bound("web/0 (abc)"));
        assert!(err.is_precondition_violation());
        assert_eq!(
            err.to_string(),
            "Planning error: Instance `web/0 (abc)' model is not bound"
        );
    }

    #[test]
    fn test_repository_error_is_not_precondition() {
        let err = PlannerError::from(RepositoryError::UnknownInstanceGroup {
            name: String::from("web"),
        });
        assert!(!err.is_precondition_violation());
    }
}
