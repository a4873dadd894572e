//! Adapters for the settlement engine's outbound ports.
//!
//! - `memory_store`: `InMemoryRecordStore`, atomic conditional writes
//! - `publisher`: channel, no-op and recording event publishers
//! - `clock`: `ManualClock` for deterministic time

pub mod clock;
pub mod memory_store;
pub mod publisher;

pub use clock::ManualClock;
pub use memory_store::InMemoryRecordStore;
pub use publisher::{ChannelEventPublisher, NoOpPublisher, RecordingPublisher};
