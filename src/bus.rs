//! Raw frame transport boundary.
//!
//! The listener only needs two capabilities from a bus: open it by
//! interface name and receive with a bounded wait. [`BusOpener`] and
//! [`CanBus`] capture exactly that, so the real SocketCAN transport and the
//! in-memory bus used by tests and replay are interchangeable.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::codec::{encode, Record};

/// Classic CAN payload limit.
pub const MAX_PAYLOAD: usize = 8;

pub const DEFAULT_INTERFACE: &str = "can0";
pub const DEFAULT_BITRATE: u32 = 500_000;
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("failed to open bus {interface}: {reason}")]
    Open { interface: String, reason: String },
    #[error("bus transport unavailable: {0}")]
    Unavailable(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("bus closed")]
    Closed,
    #[error("payload of {0} bytes exceeds a classic frame")]
    PayloadTooLong(usize),
}

/// A frame as delivered by the transport, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u32,
    pub data: Vec<u8, MAX_PAYLOAD>,
}

impl RawFrame {
    pub fn new(id: u32, data: &[u8]) -> Result<Self, BusError> {
        let data = Vec::from_slice(data).map_err(|()| BusError::PayloadTooLong(data.len()))?;
        Ok(Self { id, data })
    }

    /// Wire form of a decoded record, as the ECU would publish it.
    pub fn from_record(record: &Record) -> Self {
        let bytes = encode(record);
        Self {
            id: record.message_id().raw(),
            data: Vec::from_slice(&bytes).unwrap_or_default(),
        }
    }
}

/// Transport parameters for the publish bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub interface: String,
    pub bitrate: u32,
    pub recv_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            bitrate: DEFAULT_BITRATE,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
        }
    }
}

impl BusConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// An open bus handle.
pub trait CanBus: Send {
    /// Waits at most `timeout` for the next frame; `Ok(None)` on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawFrame>, BusError>;

    /// Releases the handle. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens bus handles for a configured interface.
pub trait BusOpener: Send + Sync {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanBus>, BusError>;

    /// Cheap availability check: open and immediately close.
    fn probe(&self, config: &BusConfig) -> Result<(), BusError> {
        let mut bus = self.open(config)?;
        bus.close();
        Ok(())
    }
}

/// Opener for the hardware transport compiled into this build.
#[cfg(feature = "socketcan")]
pub fn default_opener() -> Arc<dyn BusOpener> {
    Arc::new(socket::SocketCanOpener)
}

/// Opener for the hardware transport compiled into this build.
#[cfg(not(feature = "socketcan"))]
pub fn default_opener() -> Arc<dyn BusOpener> {
    Arc::new(UnavailableOpener::new("built without the `socketcan` feature"))
}

/// Opener that always fails, used when no hardware transport exists.
#[derive(Debug, Clone)]
pub struct UnavailableOpener {
    reason: String,
}

impl UnavailableOpener {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl BusOpener for UnavailableOpener {
    fn open(&self, _config: &BusConfig) -> Result<Box<dyn CanBus>, BusError> {
        Err(BusError::Unavailable(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// In-memory bus
// ---------------------------------------------------------------------------

type SharedReceiver = Arc<Mutex<Option<Receiver<RawFrame>>>>;

/// Channel-backed bus. Frames pushed through a [`MemoryBusSender`] are
/// delivered to whichever handle currently has the bus open; closing the
/// handle returns the receiving end so the bus can be reopened.
#[derive(Debug)]
pub struct MemoryBusOpener {
    receiver: SharedReceiver,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

/// Producer side of a [`MemoryBusOpener`].
#[derive(Debug, Clone)]
pub struct MemoryBusSender {
    tx: Sender<RawFrame>,
}

impl MemoryBusSender {
    /// Returns `false` once the bus side has been dropped.
    pub fn send(&self, frame: RawFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn send_record(&self, record: &Record) -> bool {
        self.send(RawFrame::from_record(record))
    }
}

impl MemoryBusOpener {
    pub fn new() -> (Self, MemoryBusSender) {
        let (tx, rx) = mpsc::channel();
        let opener = Self {
            receiver: Arc::new(Mutex::new(Some(rx))),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        (opener, MemoryBusSender { tx })
    }

    /// Successful opens so far, probes included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl BusOpener for MemoryBusOpener {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanBus>, BusError> {
        let rx = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BusError::Open {
                interface: config.interface.clone(),
                reason: "already open".to_string(),
            })?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBus {
            rx: Some(rx),
            slot: Arc::clone(&self.receiver),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct MemoryBus {
    rx: Option<Receiver<RawFrame>>,
    slot: SharedReceiver,
    closes: Arc<AtomicUsize>,
}

impl CanBus for MemoryBus {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawFrame>, BusError> {
        let rx = self.rx.as_ref().ok_or(BusError::Closed)?;
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Closed),
        }
    }

    fn close(&mut self) {
        if let Some(rx) = self.rx.take() {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// SocketCAN
// ---------------------------------------------------------------------------

#[cfg(feature = "socketcan")]
mod socket {
    use super::{BusConfig, BusError, BusOpener, CanBus, RawFrame};
    use socketcan::{CanSocket, EmbeddedFrame, Id, Socket};
    use std::io::ErrorKind;
    use std::time::Duration;

    /// Linux SocketCAN transport. The bitrate is a property of the
    /// interface (set with `ip link`), so it is only reported here.
    pub struct SocketCanOpener;

    impl BusOpener for SocketCanOpener {
        fn open(&self, config: &BusConfig) -> Result<Box<dyn CanBus>, BusError> {
            let socket = CanSocket::open(&config.interface).map_err(|e| BusError::Open {
                interface: config.interface.clone(),
                reason: e.to_string(),
            })?;
            tracing::debug!(
                interface = %config.interface,
                bitrate = config.bitrate,
                "socketcan interface opened"
            );
            Ok(Box::new(SocketCanBus { socket: Some(socket) }))
        }
    }

    struct SocketCanBus {
        socket: Option<CanSocket>,
    }

    impl CanBus for SocketCanBus {
        fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawFrame>, BusError> {
            let socket = self.socket.as_ref().ok_or(BusError::Closed)?;
            match socket.read_frame_timeout(timeout) {
                Ok(frame) => {
                    let id = match frame.id() {
                        Id::Standard(id) => u32::from(id.as_raw()),
                        Id::Extended(id) => id.as_raw(),
                    };
                    RawFrame::new(id, frame.data()).map(Some)
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
                Err(e) => Err(BusError::Receive(e.to_string())),
            }
        }

        fn close(&mut self) {
            self.socket = None;
        }
    }
}
