//! The common start/stop interface of telemetry sources and the one-shot
//! selection between the real bus and the synthetic fallback.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::bridge::SharedBridge;
use crate::bus::BusOpener;
use crate::config::BridgeConfig;
use crate::listener::BusListener;
use crate::synthetic::SyntheticSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Bus,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source already started")]
    AlreadyStarted,
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    #[error("synthetic source must be started inside a tokio runtime")]
    NoRuntime,
}

/// A running-or-stopped producer of bridge writes.
///
/// The caller owns the lifecycle: `start` once, `stop` at shutdown.
/// `stop` is idempotent and also runs on drop.
pub trait TelemetrySource: Send {
    fn kind(&self) -> SourceKind;
    fn start(&mut self) -> Result<(), SourceError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Picks the active source, not yet started.
///
/// With fallback enabled the real bus is probed once (open, then close);
/// success yields a [`BusListener`], any failure a [`SyntheticSource`].
/// With fallback disabled a listener is always returned and a missing bus
/// shows up later as its `Disconnected` state. There is no re-probe: a new
/// selection is needed to switch sources.
pub fn select_source(
    config: &BridgeConfig,
    opener: Arc<dyn BusOpener>,
    bridge: SharedBridge,
) -> Box<dyn TelemetrySource> {
    if !config.fallback_enabled {
        info!("Synthetic fallback disabled, using CAN listener on {}", config.bus.interface);
        return Box::new(BusListener::new(bridge, opener, config.bus.clone()));
    }

    match opener.probe(&config.bus) {
        Ok(()) => {
            info!("CAN bus {} available, using CAN listener", config.bus.interface);
            Box::new(BusListener::new(bridge, opener, config.bus.clone()))
        }
        Err(e) => {
            info!("CAN bus {} unavailable ({}), using synthetic source", config.bus.interface, e);
            Box::new(SyntheticSource::new(bridge, config.synthetic.clone()))
        }
    }
}
