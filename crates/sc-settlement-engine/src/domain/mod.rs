//! # Domain Layer - Settlement Engine
//!
//! Pure business logic. No storage, no leases, no async.
//!
//! ## Components
//!
//! - `entities`: Group, Member, Contribution, LockLease records
//! - `value_objects`: identifiers, `ConfirmationSide`, `LockType`
//! - `deposit`: security deposit calculator and no-loss guarantee
//! - `confirmation`: dual-party confirmation transition
//! - `rotation`: cursor arithmetic, dense ordering, schedule
//! - `invariants`: consistency audit
//! - `outcomes`: structured results handed to collaborators
//! - `errors`: `EngineError` taxonomy

pub mod confirmation;
pub mod deposit;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod outcomes;
pub mod rotation;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use outcomes::*;
pub use value_objects::*;
