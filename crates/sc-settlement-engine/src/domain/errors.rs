//! Error types for the settlement engine.
//!
//! Every failure carries one of the taxonomy kinds below. Callers decide what
//! to do from the kind alone: only `Concurrency` is worth retrying.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value_objects::{ConfirmationSide, GroupId, MemberId, TransactionId};

/// Taxonomy kind of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    BusinessLogic,
    Concurrency,
    DataConsistency,
    Authorization,
    DuplicateConfirmation,
    NotFound,
    Store,
}

impl ErrorKind {
    /// Only lease contention and stale advancement are worth a retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Concurrency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::BusinessLogic => "business_logic_error",
            ErrorKind::Concurrency => "concurrency_error",
            ErrorKind::DataConsistency => "data_consistency_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::DuplicateConfirmation => "duplicate_confirmation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Store => "store_error",
        }
    }
}

/// Record kind used in `NotFound` errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Group,
    Member,
    Transaction,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Group => write!(f, "group"),
            RecordKind::Member => write!(f, "member"),
            RecordKind::Transaction => write!(f, "transaction"),
        }
    }
}

/// All errors the engine surfaces to its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input (out-of-range position, non-positive amount, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A business rule was violated (duplicate lock-in, premature unlock, ...)
    #[error("Business rule violated: {0}")]
    BusinessLogic(String),

    /// Lease contention or stale advancement
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Stored state violates an invariant; fatal for the affected group
    #[error("Data consistency violation in group {group_id}: {reason}")]
    DataConsistency { group_id: GroupId, reason: String },

    /// Confirming member is not the party for that side
    #[error("Member {member_id} is not authorized to confirm the {side} side of transaction {transaction_id}")]
    Authorization {
        transaction_id: TransactionId,
        member_id: MemberId,
        side: ConfirmationSide,
    },

    /// The side was already confirmed; never overwritten
    #[error("Transaction {transaction_id} already confirmed by {side}")]
    DuplicateConfirmation {
        transaction_id: TransactionId,
        side: ConfirmationSide,
    },

    /// Lookup miss
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::BusinessLogic(_) => ErrorKind::BusinessLogic,
            EngineError::Concurrency(_) => ErrorKind::Concurrency,
            EngineError::DataConsistency { .. } => ErrorKind::DataConsistency,
            EngineError::Authorization { .. } => ErrorKind::Authorization,
            EngineError::DuplicateConfirmation { .. } => ErrorKind::DuplicateConfirmation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation(reason.into())
    }

    pub fn business(reason: impl Into<String>) -> Self {
        EngineError::BusinessLogic(reason.into())
    }

    pub fn concurrency(reason: impl Into<String>) -> Self {
        EngineError::Concurrency(reason.into())
    }

    pub fn inconsistent(group_id: GroupId, reason: impl Into<String>) -> Self {
        EngineError::DataConsistency {
            group_id,
            reason: reason.into(),
        }
    }

    pub fn group_not_found(id: GroupId) -> Self {
        EngineError::NotFound {
            kind: RecordKind::Group,
            id: id.to_string(),
        }
    }

    pub fn member_not_found(id: MemberId) -> Self {
        EngineError::NotFound {
            kind: RecordKind::Member,
            id: id.to_string(),
        }
    }

    pub fn transaction_not_found(id: TransactionId) -> Self {
        EngineError::NotFound {
            kind: RecordKind::Transaction,
            id: id.to_string(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Structured failure handed to the API collaborator instead of a raw error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for Failure {
    fn from(err: &EngineError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            message: err.to_string(),
            retryable: kind.is_retryable(),
        }
    }
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        Failure::from(&err)
    }
}
