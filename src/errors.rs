//! # Engine Error Types
//!
//! Errors surfaced by the reconciliation engine and its collaborators.
//! Aggregation and offsetting never fail on unresolved ids; only direct
//! subjects of an action and persistence problems reach the caller.

use thiserror::Error;

/// Kind of entity an id failed to resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Recipe,
    Ingredient,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Recipe => write!(f, "recipe"),
            EntityKind::Ingredient => write!(f, "ingredient"),
        }
    }
}

/// Custom error types for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// An id that is the direct subject of an action does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Request rejected before any state was touched
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Document store load or save failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The user document changed between reload and commit
    #[error("Concurrent modification of user {user_id} (expected version {expected_version})")]
    ConcurrentModification { user_id: i64, expected_version: i64 },
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
