//! # Rotating Savings Circle Settlement Engine
//!
//! Tracks a fixed-membership payout rotation, sizes each member's security
//! deposit so the remaining members can never lose money to a default, and
//! advances the rotation exactly once per completed round under concurrent
//! access.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Active rotation positions are exactly `1..=N` | `domain/rotation.rs` - `check_dense_ordering()`, `redensify()` |
//! | Cursor stays in `[0, N-1]` | `application/rotation.rs` - compare-and-swap in `advance()` |
//! | Deposit covers `C * (N - p)` | `domain/deposit.rs` - `calculate_deposit()` |
//! | `both_confirmed` iff both timestamps set | `domain/confirmation.rs` - `apply_confirmation()` |
//! | At most one share per sender per round | `application/rotation.rs` - distinct-sender count |
//! | Paid-out members stay locked in until the cycle completes | `application/lockin.rs` |
//! | A paid-out defaulter covers every later share of the pass | `application/rotation.rs` - `cover_suspended_shares()`, `domain/rotation.rs` - `step_to()` |
//! | One advancement per completed round | `application/lock_manager.rs` lease + re-validation under it |
//!
//! ## Rotation Lifecycle
//!
//! ```text
//! create_group → join_group × N → confirm_security_deposit × N → start_rotation
//!      │
//!      ▼
//! [AWAITING_CONTRIBUTIONS(p)] ──N-1 both_confirmed──→ advance() ──→ [AWAITING(p+1 mod N)]
//!                                                          │
//!                                 total_rotations_completed >= N
//!                                                          ▼
//!                                          unlock + DepositReturnDue, group closed
//! ```
//!
//! ## Leases
//!
//! | Lease | Guards |
//! |-------|--------|
//! | `rotation_advance` | cursor movement, lock-in, unlock |
//! | `member_join` | joins, departures, deposit confirmation and replenishment, roster changes during a step |
//! | `default_handling` | default cover and suspension |
//!
//! Leases are taken in that order (`default_handling`, `rotation_advance`,
//! `member_join`) and never the reverse. `acquire` never blocks: a held
//! lease is a `Concurrency` error for the caller to retry.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  DRIVEN SIDE                                                    │
//! │  adapters/ - in-memory store, channel publisher, manual clock   │
//! └─────────────────────────────────────────────────────────────────┘
//!                          adapters plug into ports
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PORTS AND SERVICES                                             │
//! │  ports/inbound.rs  - SettlementApi trait                        │
//! │  ports/outbound.rs - RecordStore, EventPublisher, TimeSource    │
//! │  application/      - services, LockManager, AdvancementWorker   │
//! └─────────────────────────────────────────────────────────────────┘
//!                          services call into
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PURE DOMAIN (no I/O, no async)                                 │
//! │  domain/entities.rs     - Group, Member, Contribution, LockLease│
//! │  domain/deposit.rs      - deposit formula, sufficiency          │
//! │  domain/confirmation.rs - dual-party state machine              │
//! │  domain/rotation.rs     - cursor arithmetic, schedule           │
//! │  domain/invariants.rs   - consistency audit                     │
//! │  domain/errors.rs       - EngineError, ErrorKind                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (publisher, events) = ChannelEventPublisher::new(config.event_channel_capacity);
//! let engine = SettlementEngine::new(store, Arc::new(publisher), Arc::new(SystemTimeSource), config)?;
//! AdvancementWorker::new(engine.rotation().clone(), events).spawn();
//! engine.spawn_lock_sweeper();
//! ```

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod events;
pub mod ports;

pub use adapters::{
    ChannelEventPublisher, InMemoryRecordStore, ManualClock, NoOpPublisher, RecordingPublisher,
};
pub use application::{AdvancementWorker, LockManager, SettlementEngine};
pub use config::EngineConfig;
pub use domain::*;
pub use events::EngineEvent;
pub use ports::inbound::{NewGroup, NewTransaction, SettlementApi};
pub use ports::outbound::{EventPublisher, RecordStore, SystemTimeSource, TimeSource};
