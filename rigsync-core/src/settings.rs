//! Session settings read at session start.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port of the counterpart server.
pub const DEFAULT_PORT: u16 = 31337;

/// Tunables for a sync session.
///
/// The persisted host flags (`auto_connect`, `live_sync_enabled`) live here
/// next to the timing constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Port of the counterpart server on localhost.
    pub port: u16,
    /// Connect as soon as the session starts.
    pub auto_connect: bool,
    /// Start in live sync mode.
    pub live_sync_enabled: bool,
    /// Delay between poll ticks.
    pub poll_interval_ms: u64,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Upper bound for the growing reconnect delay.
    pub max_reconnect_delay_ms: u64,
    /// Connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auto_connect: false,
            live_sync_enabled: false,
            poll_interval_ms: 500,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 8_000,
            max_reconnect_attempts: 3,
            request_timeout_ms: 5_000,
        }
    }
}

impl SessionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time up
    /// to `max_reconnect_delay_ms`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.reconnect_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms)))
    }
}
