//! Domain errors surfaced to users of the tracker.
//!
//! Storage and I/O failures travel as `anyhow::Error`; these variants are the
//! failures a caller is expected to report back to the person at the keyboard.
//! Use `err.downcast_ref::<TrackerError>()` to tell them apart.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Identifier {identifier} already exists in project {project}")]
    DuplicateIdentifier { project: Uuid, identifier: String },

    #[error("User {user} is already a member of organization {organization}")]
    DuplicateMembership { user: Uuid, organization: Uuid },

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Invalid requirement type: {0}")]
    InvalidType(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Requirement and objective must belong to the same project.")]
    CrossProjectObjective,

    #[error("Referenced {kind} {id} belongs to a different project")]
    CrossProjectReference { kind: &'static str, id: Uuid },

    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Identifier sequence exhausted in project {project}")]
    IdentifierSequenceExhausted { project: Uuid },
}

impl TrackerError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TrackerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Returns the domain error carried by an `anyhow::Error`, if any
pub fn as_tracker_error(err: &anyhow::Error) -> Option<&TrackerError> {
    err.downcast_ref::<TrackerError>()
}
