//! Staleness queries over a [`TelemetryState`] snapshot.
//!
//! A channel is stale when it has never been written, or when
//! `now - updated_at > timeout` on the bridge clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bridge::{Slot, TelemetryState};
use crate::schema::MessageId;

pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_HZ: u32 = 20;

impl<T> Slot<T> {
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_stale(&self, now_us: u64, timeout: Duration) -> bool {
        if !self.is_set() {
            return true;
        }
        now_us.saturating_sub(self.updated_at_us) > timeout.as_micros() as u64
    }

    /// Time since the last write, `None` if never written.
    pub fn age(&self, now_us: u64) -> Option<Duration> {
        self.is_set()
            .then(|| Duration::from_micros(now_us.saturating_sub(self.updated_at_us)))
    }
}

/// Per-channel staleness at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessReport {
    pub status: bool,
    pub context: bool,
    pub wheels: bool,
    pub dynamics: bool,
}

impl StalenessReport {
    pub fn get(&self, channel: MessageId) -> bool {
        match channel {
            MessageId::Status => self.status,
            MessageId::Context => self.context,
            MessageId::WheelSpeeds => self.wheels,
            MessageId::Dynamics => self.dynamics,
        }
    }

    pub fn any(&self) -> bool {
        self.status || self.context || self.wheels || self.dynamics
    }

    pub fn all(&self) -> bool {
        self.status && self.context && self.wheels && self.dynamics
    }

    /// Status or context stale; the diff display cannot work without both.
    pub fn primary(&self) -> bool {
        self.status || self.context
    }

    pub fn stale_channels(&self) -> impl Iterator<Item = MessageId> + '_ {
        MessageId::ALL.into_iter().filter(|c| self.get(*c))
    }
}

impl TelemetryState {
    pub fn is_stale(&self, channel: MessageId, now_us: u64, timeout: Duration) -> bool {
        match channel {
            MessageId::Status => self.status.is_stale(now_us, timeout),
            MessageId::Context => self.context.is_stale(now_us, timeout),
            MessageId::WheelSpeeds => self.wheels.is_stale(now_us, timeout),
            MessageId::Dynamics => self.dynamics.is_stale(now_us, timeout),
        }
    }

    pub fn staleness(&self, now_us: u64, timeout: Duration) -> StalenessReport {
        StalenessReport {
            status: self.status.is_stale(now_us, timeout),
            context: self.context.is_stale(now_us, timeout),
            wheels: self.wheels.is_stale(now_us, timeout),
            dynamics: self.dynamics.is_stale(now_us, timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_of_unset_slot() {
        let slot: Slot<u8> = Slot::default();
        assert_eq!(slot.age(1_000_000), None);
        let slot = Slot { value: 0u8, updated_at_us: 400 };
        assert_eq!(slot.age(1_400), Some(Duration::from_micros(1_000)));
        assert_eq!(slot.age(100), Some(Duration::ZERO));
    }

    #[test]
    fn test_report_aggregates() {
        let report = StalenessReport { status: false, context: false, wheels: true, dynamics: false };
        assert!(report.any());
        assert!(!report.all());
        assert!(!report.primary());
        assert_eq!(report.stale_channels().collect::<Vec<_>>(), vec![MessageId::WheelSpeeds]);
    }
}
