//! # ECU Bus Telemetry Bridge
//!
//! Ingests fixed-layout telemetry frames from an engine-control-unit bus,
//! decodes them into typed physical quantities and exposes the latest
//! values to polling consumers through a thread-safe snapshot.
//!
//! ## Features
//!
//! - **Wire codec**: bit-exact big-endian layouts with scaling, sentinels
//!   and bit flags for the four publish-bus messages (0x6A0-0x6A3)
//! - **Bus listener**: background receive loop with bounded waits, frame
//!   filtering and guaranteed bus cleanup
//! - **Synthetic fallback**: per-channel periodic generators that honour the
//!   exact same bridge contract when no bus is present
//! - **State bridge**: one lock, channel-scoped writes, consistent
//!   by-value snapshots and staleness queries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ecu_bridge::{bus, select_source, BridgeConfig, TelemetryBridge};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::default();
//! let bridge = TelemetryBridge::shared();
//!
//! let mut source = select_source(&config, bus::default_opener(), bridge.clone());
//! source.start()?;
//!
//! let snapshot = bridge.snapshot();
//! let stale = snapshot.staleness(bridge.now_us(), config.consumer.stale_timeout());
//! println!("lock {:.1}% stale={}", snapshot.status.value.lock_command_pct, stale.any());
//!
//! source.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`schema`] - Static frame layouts and identifiers
//! - [`codec`] - Pure decode/encode between bytes and records
//! - [`bus`] - Raw frame transport boundary
//! - [`listener`] - Real-bus worker thread
//! - [`synthetic`] - Simulated source
//! - [`source`] - Source trait and selection
//! - [`bridge`] - Shared telemetry state
//! - [`staleness`] - Staleness queries on snapshots
//! - [`config`] - Runtime configuration

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod bus;
pub mod codec;
pub mod config;
pub mod listener;
pub mod schema;
pub mod source;
pub mod staleness;
pub mod synthetic;

// Re-export main public types for convenience
pub use bridge::{SharedBridge, TelemetryBridge, TelemetryState};
pub use codec::{decode, encode, DecodeError, Record};
pub use config::BridgeConfig;
pub use listener::{BusListener, ListenerState};
pub use schema::{MessageId, SurfaceState};
pub use source::{select_source, SourceKind, TelemetrySource};
pub use synthetic::SyntheticSource;
