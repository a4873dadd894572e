//! Ports layer for the settlement engine.
//!
//! - Inbound (driving): `SettlementApi`
//! - Outbound (driven): `RecordStore`, `EventPublisher`, `TimeSource`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
