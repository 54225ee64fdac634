//! Thread-safe aggregate of the latest decoded values.
//!
//! The bridge is the single shared mutable resource of the crate. The
//! active source writes through the channel-scoped `update_*` calls;
//! consumers take self-consistent copies with [`TelemetryBridge::snapshot`].
//! One mutex guards the whole [`TelemetryState`]; every critical section is
//! a handful of field copies, so readers never wait on slow work.

use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::codec::{ContextRecord, DynamicsRecord, Record, StatusRecord, WheelSpeedRecord};

/// Status samples kept for trend consumers, about five seconds at 50 Hz.
pub const HISTORY_CAPACITY: usize = 256;

/// Timestamp value of a slot that has never been written.
pub const NEVER: u64 = 0;

/// Latest value of one channel group and when it arrived, in microseconds
/// on the owning bridge's monotonic clock. `updated_at_us == NEVER` means
/// nothing has been received yet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Slot<T> {
    pub value: T,
    pub updated_at_us: u64,
}

impl<T> Slot<T> {
    pub fn is_set(&self) -> bool {
        self.updated_at_us != NEVER
    }
}

/// Everything a consumer can observe. Returned by value from
/// [`TelemetryBridge::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryState {
    pub status: Slot<StatusRecord>,
    pub context: Slot<ContextRecord>,
    pub wheels: Slot<WheelSpeedRecord>,
    pub dynamics: Slot<DynamicsRecord>,
    pub connected: bool,
}

/// One entry of the rolling status window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    pub at_us: u64,
    pub lock_command_pct: f32,
    pub slip_delta_kph: Option<f32>,
}

pub type SharedBridge = Arc<TelemetryBridge>;

#[derive(Debug)]
pub struct TelemetryBridge {
    state: Mutex<TelemetryState>,
    history: Mutex<HistoryBuffer<StatusSample, HISTORY_CAPACITY>>,
    epoch: Instant,
}

assert_impl_all!(TelemetryBridge: Send, Sync);

impl Default for TelemetryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TelemetryState::default()),
            history: Mutex::new(HistoryBuffer::new()),
            epoch: Instant::now(),
        }
    }

    pub fn shared() -> SharedBridge {
        Arc::new(Self::new())
    }

    /// Current time on this bridge's clock. Never returns [`NEVER`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn now_us(&self) -> u64 {
        (self.epoch.elapsed().as_micros() as u64).max(1)
    }

    /// Consistent copy of the whole state. The lock is released before
    /// this returns.
    pub fn snapshot(&self) -> TelemetryState {
        *self.lock_state()
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    /// Rolling status window, oldest first.
    pub fn history(&self) -> Vec<StatusSample> {
        self.lock_history().oldest_ordered().copied().collect()
    }

    pub fn update_status(&self, record: StatusRecord) {
        let at_us = self.now_us();
        {
            let mut state = self.lock_state();
            state.status = Slot { value: record, updated_at_us: at_us };
            state.connected = true;
        }
        self.lock_history().write(StatusSample {
            at_us,
            lock_command_pct: record.lock_command_pct,
            slip_delta_kph: record.slip_delta_kph,
        });
    }

    pub fn update_context(&self, record: ContextRecord) {
        let at_us = self.now_us();
        let mut state = self.lock_state();
        state.context = Slot { value: record, updated_at_us: at_us };
        state.connected = true;
    }

    pub fn update_wheel_speeds(&self, record: WheelSpeedRecord) {
        let at_us = self.now_us();
        let mut state = self.lock_state();
        state.wheels = Slot { value: record, updated_at_us: at_us };
        state.connected = true;
    }

    pub fn update_dynamics(&self, record: DynamicsRecord) {
        let at_us = self.now_us();
        let mut state = self.lock_state();
        state.dynamics = Slot { value: record, updated_at_us: at_us };
        state.connected = true;
    }

    /// Routes a decoded record to its channel's write.
    pub fn apply(&self, record: Record) {
        match record {
            Record::Status(r) => self.update_status(r),
            Record::Context(r) => self.update_context(r),
            Record::WheelSpeeds(r) => self.update_wheel_speeds(r),
            Record::Dynamics(r) => self.update_dynamics(r),
        }
    }

    /// Clears the connectivity flag; channel values are left as they were.
    pub fn set_disconnected(&self) {
        self.lock_state().connected = false;
    }

    // A writer that panicked mid-update cannot leave a slot half-written
    // (each write is a single struct assignment), so poisoning is ignored.
    fn lock_state(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryBuffer<StatusSample, HISTORY_CAPACITY>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
