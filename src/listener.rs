//! Background worker that reads the real bus and feeds the bridge.
//!
//! Lifecycle: `Init -> Opening -> Running -> Stopped`, or
//! `Opening -> Disconnected` when the bus cannot be opened. Both terminal
//! states are final for the instance; recovering needs a new listener.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::{SharedBridge, TelemetryBridge};
use crate::bus::{BusConfig, BusError, BusOpener, CanBus, RawFrame};
use crate::codec::{self, DecodeError};
use crate::schema::MessageId;
use crate::source::{SourceError, SourceKind, TelemetrySource};

const THREAD_NAME: &str = "ecu-bus-listener";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    Init,
    Opening,
    Running,
    Stopped,
    Disconnected,
}

impl ListenerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerState::Stopped | ListenerState::Disconnected)
    }
}

/// Per-frame counters, updated lock-free by the receive loop.
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    decoded: AtomicU64,
    malformed: AtomicU64,
    ignored: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameCounters {
    pub received: u64,
    pub decoded: u64,
    pub malformed: u64,
    /// Frames with an identifier outside the filter set.
    pub ignored: u64,
}

impl ListenerStats {
    pub fn counters(&self) -> FrameCounters {
        FrameCounters {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Applied(MessageId),
    Ignored,
    Malformed(DecodeError),
}

/// Filters, decodes and applies a single frame. Never fails: unknown
/// identifiers are dropped silently and malformed payloads are logged and
/// dropped without touching the bridge.
pub fn process_frame(frame: &RawFrame, bridge: &TelemetryBridge, stats: &ListenerStats) -> FrameOutcome {
    stats.received.fetch_add(1, Ordering::Relaxed);

    let Some(id) = MessageId::from_raw(frame.id) else {
        stats.ignored.fetch_add(1, Ordering::Relaxed);
        return FrameOutcome::Ignored;
    };

    match codec::decode(id, &frame.data) {
        Ok(record) => {
            bridge.apply(record);
            stats.decoded.fetch_add(1, Ordering::Relaxed);
            FrameOutcome::Applied(id)
        }
        Err(e) => {
            debug!("Decode error on 0x{:03X}: {}", frame.id, e);
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            FrameOutcome::Malformed(e)
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ListenerState>,
    stop: AtomicBool,
    stats: ListenerStats,
}

impl Shared {
    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Closes the bus on every exit path out of the worker, unwinding included.
struct BusGuard {
    bus: Box<dyn CanBus>,
    interface: String,
}

impl Drop for BusGuard {
    fn drop(&mut self) {
        self.bus.close();
        info!("CAN bus {} closed", self.interface);
    }
}

pub struct BusListener {
    bridge: SharedBridge,
    opener: Arc<dyn BusOpener>,
    config: BusConfig,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl BusListener {
    pub fn new(bridge: SharedBridge, opener: Arc<dyn BusOpener>, config: BusConfig) -> Self {
        Self {
            bridge,
            opener,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ListenerState::Init),
                stop: AtomicBool::new(false),
                stats: ListenerStats::default(),
            }),
            handle: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    pub fn counters(&self) -> FrameCounters {
        self.shared.stats.counters()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

impl TelemetrySource for BusListener {
    fn kind(&self) -> SourceKind {
        SourceKind::Bus
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.handle.is_some() || self.state() != ListenerState::Init {
            return Err(SourceError::AlreadyStarted);
        }

        let bridge = Arc::clone(&self.bridge);
        let opener = Arc::clone(&self.opener);
        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        shared.set_state(ListenerState::Opening);

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&bridge, opener.as_ref(), &config, &shared))
            .map_err(|e| {
                self.shared.set_state(ListenerState::Init);
                SourceError::Spawn(e.to_string())
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals the worker and joins it. Returns within one receive
    /// timeout of the signal.
    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("CAN listener thread panicked");
                    self.bridge.set_disconnected();
                    self.shared.set_state(ListenerState::Stopped);
                }
            }
            None => {
                if self.state() == ListenerState::Init {
                    self.shared.set_state(ListenerState::Stopped);
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && !self.state().is_terminal()
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(bridge: &TelemetryBridge, opener: &dyn BusOpener, config: &BusConfig, shared: &Shared) {
    let bus = match opener.open(config) {
        Ok(bus) => bus,
        Err(e) => {
            warn!("Failed to open CAN bus {}: {}", config.interface, e);
            bridge.set_disconnected();
            shared.set_state(ListenerState::Disconnected);
            return;
        }
    };
    info!("CAN bus opened on {} ({} bit/s)", config.interface, config.bitrate);

    let mut guard = BusGuard { bus, interface: config.interface.clone() };
    shared.set_state(ListenerState::Running);

    let result = receive_loop(guard.bus.as_mut(), bridge, shared, config.recv_timeout());
    drop(guard);

    match result {
        Ok(()) => shared.set_state(ListenerState::Stopped),
        Err(e) => {
            warn!("CAN receive on {} failed: {}", config.interface, e);
            bridge.set_disconnected();
            shared.set_state(ListenerState::Disconnected);
        }
    }
}

/// Receives until the stop flag is raised. The bounded wait is the only
/// suspension point, so the flag is observed at least once per `timeout`.
fn receive_loop(
    bus: &mut dyn CanBus,
    bridge: &TelemetryBridge,
    shared: &Shared,
    timeout: Duration,
) -> Result<(), BusError> {
    while !shared.stop.load(Ordering::SeqCst) {
        if let Some(frame) = bus.recv_timeout(timeout)? {
            process_frame(&frame, bridge, &shared.stats);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ContextRecord, Record};

    #[test]
    fn test_process_frame_counts_outcomes() {
        let bridge = TelemetryBridge::new();
        let stats = ListenerStats::default();

        let unknown = RawFrame::new(0x7E8, &[0; 8]).unwrap();
        assert_eq!(process_frame(&unknown, &bridge, &stats), FrameOutcome::Ignored);

        let short = RawFrame::new(0x6A1, &[1, 2]).unwrap();
        assert!(matches!(
            process_frame(&short, &bridge, &stats),
            FrameOutcome::Malformed(DecodeError::TooShort { need: 5, .. })
        ));

        let ctx = RawFrame::from_record(&Record::Context(ContextRecord {
            gear: 4,
            speed_kph: 101.25,
            throttle_pct: 33.3,
        }));
        assert_eq!(process_frame(&ctx, &bridge, &stats), FrameOutcome::Applied(MessageId::Context));

        assert_eq!(
            stats.counters(),
            FrameCounters { received: 3, decoded: 1, malformed: 1, ignored: 1 }
        );
        assert_eq!(bridge.snapshot().context.value.gear, 4);
    }

    #[test]
    fn test_stop_before_start() {
        let (opener, _tx) = crate::bus::MemoryBusOpener::new();
        let mut listener = BusListener::new(TelemetryBridge::shared(), Arc::new(opener), BusConfig::default());
        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.start(), Err(SourceError::AlreadyStarted));
    }
}
