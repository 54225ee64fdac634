//! Synthetic stand-in for the ECU bus.
//!
//! One periodic tokio task per message type, each at its own rate, driving
//! a shared [`SyntheticModel`]. Every tick produces a complete record,
//! sends it through the wire codec so it carries wire precision, and writes
//! it to the bridge with the same calls the bus listener uses.

pub mod model;

pub use model::{gear_for_speed, SyntheticModel};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::bridge::{SharedBridge, TelemetryBridge};
use crate::codec::{self, Record};
use crate::schema::MessageId;
use crate::source::{SourceError, SourceKind, TelemetrySource};

pub const DEFAULT_STATUS_HZ: u32 = 50;
pub const DEFAULT_CONTEXT_HZ: u32 = 20;
pub const DEFAULT_WHEEL_HZ: u32 = 50;
pub const DEFAULT_DYNAMICS_HZ: u32 = 50;

/// Per-channel tick rates and an optional fixed seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub status_hz: u32,
    pub context_hz: u32,
    pub wheel_hz: u32,
    pub dynamics_hz: u32,
    /// Reproducible output when set; seeded from the OS otherwise.
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            status_hz: DEFAULT_STATUS_HZ,
            context_hz: DEFAULT_CONTEXT_HZ,
            wheel_hz: DEFAULT_WHEEL_HZ,
            dynamics_hz: DEFAULT_DYNAMICS_HZ,
            seed: None,
        }
    }
}

impl SyntheticConfig {
    pub fn rate_hz(&self, id: MessageId) -> u32 {
        match id {
            MessageId::Status => self.status_hz,
            MessageId::Context => self.context_hz,
            MessageId::WheelSpeeds => self.wheel_hz,
            MessageId::Dynamics => self.dynamics_hz,
        }
    }

    /// Tick period for `id`. A zero rate is treated as 1 Hz; config
    /// validation rejects it before it gets here.
    pub fn period(&self, id: MessageId) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.rate_hz(id).max(1)))
    }
}

pub struct SyntheticSource {
    bridge: SharedBridge,
    config: SyntheticConfig,
    model: Arc<Mutex<SyntheticModel>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(bridge: SharedBridge, config: SyntheticConfig) -> Self {
        let model = match config.seed {
            Some(seed) => SyntheticModel::new(seed),
            None => SyntheticModel::from_entropy(),
        };
        Self {
            bridge,
            config,
            model: Arc::new(Mutex::new(model)),
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

impl TelemetrySource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    /// Spawns the per-channel tasks on the current tokio runtime.
    fn start(&mut self) -> Result<(), SourceError> {
        if !self.tasks.is_empty() {
            return Err(SourceError::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| SourceError::NoRuntime)?;

        for id in MessageId::ALL {
            let period = self.config.period(id);
            let model = Arc::clone(&self.model);
            let bridge = Arc::clone(&self.bridge);
            self.tasks.push(runtime.spawn(run_channel(id, period, model, bridge)));
        }
        info!(
            "Synthetic source started (status {} Hz, context {} Hz, wheels {} Hz, dynamics {} Hz)",
            self.config.status_hz, self.config.context_hz, self.config.wheel_hz, self.config.dynamics_hz
        );
        Ok(())
    }

    /// Halts scheduling of future ticks. A tick never awaits, so no tick
    /// is ever cut short.
    fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Synthetic source stopped");
    }

    fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_channel(
    id: MessageId,
    period: Duration,
    model: Arc<Mutex<SyntheticModel>>,
    bridge: SharedBridge,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let dt_s = period.as_secs_f32();

    loop {
        interval.tick().await;
        let record = model.lock().unwrap_or_else(PoisonError::into_inner).tick(id, dt_s);
        publish(&bridge, &record);
    }
}

/// Writes `record` at wire precision. A record that fails its own round
/// trip is a model bug; it is logged and skipped.
pub fn publish(bridge: &TelemetryBridge, record: &Record) {
    match codec::requantize(record) {
        Ok(quantized) => bridge.apply(quantized),
        Err(e) => error!("Synthetic {} record failed wire check: {}", record.message_id(), e),
    }
}
