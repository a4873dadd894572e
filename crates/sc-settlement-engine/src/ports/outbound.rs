//! # Outbound Ports
//!
//! Dependencies the engine drives: a generic persistent-record store, an
//! event sink for notification/payment collaborators, and a clock.
//!
//! ## Record store contract
//!
//! Rows are JSON documents keyed by a string id inside a named collection.
//! Every write that carries a [`Precondition`] is a single atomic step at the
//! storage layer: the precondition is evaluated against the row as currently
//! stored and the write applies only if it holds. Lease acquisition, the
//! group cursor update and confirmation updates all rely on this;
//! implementations must never split it into a read followed by a write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::EngineError;
use crate::events::EngineEvent;

/// A stored document.
pub type Row = Value;

// =============================================================================
// RECORD STORE
// =============================================================================

/// Named record collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Group,
    Member,
    Transaction,
    LockLease,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Group => "group",
            Collection::Member => "member",
            Collection::Transaction => "transaction",
            Collection::LockLease => "lock_lease",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Conjunction of top-level field equality clauses. An empty filter matches
/// every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field == value`.
    pub fn eq(mut self, field: &str, value: impl Serialize) -> Self {
        self.clauses.push((field.to_string(), to_value(value)));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| row.get(field) == Some(value))
    }
}

/// Condition evaluated against the currently stored row of a write.
#[derive(Clone, Debug, PartialEq)]
pub enum Precondition {
    /// Unconditional
    Always,
    /// No row is stored under the id
    Absent,
    /// A row is stored and `field == value`
    FieldEquals(String, Value),
    /// A row is stored and its integer `field` is strictly below the bound
    FieldLessThan(String, i64),
    /// At least one of the inner conditions holds
    AnyOf(Vec<Precondition>),
    /// Every inner condition holds
    AllOf(Vec<Precondition>),
}

impl Precondition {
    pub fn field_equals(field: &str, value: impl Serialize) -> Self {
        Precondition::FieldEquals(field.to_string(), to_value(value))
    }

    pub fn field_less_than(field: &str, bound: i64) -> Self {
        Precondition::FieldLessThan(field.to_string(), bound)
    }

    /// Evaluate against `current`, the stored row if any.
    pub fn holds(&self, current: Option<&Row>) -> bool {
        match self {
            Precondition::Always => true,
            Precondition::Absent => current.is_none(),
            Precondition::FieldEquals(field, value) => {
                current.and_then(|row| row.get(field)) == Some(value)
            }
            Precondition::FieldLessThan(field, bound) => current
                .and_then(|row| row.get(field))
                .and_then(Value::as_i64)
                .is_some_and(|v| v < *bound),
            Precondition::AnyOf(options) => options.iter().any(|p| p.holds(current)),
            Precondition::AllOf(required) => required.iter().all(|p| p.holds(current)),
        }
    }
}

/// Result of a conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Rejected,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} row {id} already exists")]
    AlreadyExists { collection: Collection, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("row encoding failed: {0}")]
    Encoding(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err.to_string())
    }
}

/// Generic persistent-record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a row; fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, collection: Collection, id: &str, row: Row) -> Result<(), StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Row>, StoreError>;

    async fn select(&self, collection: Collection, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    /// Replace an existing row if `precondition` holds. A missing row is
    /// always `Rejected`.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        row: Row,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError>;

    /// Insert or replace if `precondition` holds.
    async fn conditional_write(
        &self,
        collection: Collection,
        id: &str,
        row: Row,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError>;

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        precondition: Precondition,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete every row for which `precondition` holds; returns the count.
    async fn delete_where(
        &self,
        collection: Collection,
        precondition: Precondition,
    ) -> Result<usize, StoreError>;
}

// =============================================================================
// EVENTS
// =============================================================================

/// Error type for publish operations.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("event channel closed")]
    Closed,
    #[error("event channel full")]
    Full,
}

/// Sink for engine events. Called only after the mutation has committed.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: EngineEvent) -> Result<(), PublishError>;
}

// =============================================================================
// TIME
// =============================================================================

/// Time source for consistent timestamp handling.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
