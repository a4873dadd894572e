//! Configuration for the settlement engine

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, EngineResult};

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lease time-to-live (seconds)
    pub lock_ttl_secs: u64,
    /// Interval between expired-lease sweeps (seconds)
    pub lock_sweep_interval_secs: u64,
    /// Compare-and-swap attempts for a confirmation before giving up
    pub confirm_max_retries: u32,
    /// Grace added to a contribution deadline before a default is due (seconds)
    pub default_grace_period_secs: u64,
    /// Bounded capacity of the event channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            lock_sweep_interval_secs: 60,
            confirm_max_retries: 8,
            default_grace_period_secs: 0,
            event_channel_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.lock_ttl_secs == 0 {
            return Err(EngineError::validation("lock_ttl_secs must be positive"));
        }
        if self.confirm_max_retries == 0 {
            return Err(EngineError::validation("confirm_max_retries must be positive"));
        }
        if self.event_channel_capacity == 0 {
            return Err(EngineError::validation("event_channel_capacity must be positive"));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(self.lock_ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_sweep_interval_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::seconds(self.default_grace_period_secs as i64)
    }
}
