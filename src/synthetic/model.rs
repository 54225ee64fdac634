use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::codec::{ContextRecord, DynamicsRecord, Record, StatusFlags, StatusRecord, WheelSpeedRecord};
use crate::schema::{MessageId, SurfaceState};

// Physical ranges every value is clamped to after an update
pub const LOCK_RANGE: (f32, f32) = (0.0, 100.0);
pub const THROTTLE_RANGE: (f32, f32) = (0.0, 100.0);
pub const SPEED_RANGE: (f32, f32) = (0.0, 220.0);
pub const SLIP_RANGE: (f32, f32) = (-15.0, 15.0);
pub const STEERING_RANGE: (f32, f32) = (-540.0, 540.0);
pub const YAW_RANGE: (f32, f32) = (-60.0, 60.0);
pub const LATERAL_G_RANGE: (f32, f32) = (-1.5, 1.5);
pub const BRAKE_RANGE: (f32, f32) = (0.0, 80.0);

/// Throttle below which the driver is treated as braking.
const BRAKING_THROTTLE: f32 = 15.0;
const SURFACE_CHANGE_PROBABILITY: f64 = 0.001;
const SLIP_SPIKE_PROBABILITY: f64 = 0.02;
const LIFT_PROBABILITY: f64 = 0.05;
const STOMP_PROBABILITY: f64 = 0.05;

fn clamp(value: f32, range: (f32, f32)) -> f32 {
    value.clamp(range.0, range.1)
}

/// Gear a driver would hold at `speed_kph`.
pub fn gear_for_speed(speed_kph: f32) -> u8 {
    match speed_kph {
        s if s < 20.0 => 1,
        s if s < 45.0 => 2,
        s if s < 75.0 => 3,
        s if s < 110.0 => 4,
        s if s < 150.0 => 5,
        _ => 6,
    }
}

/// Pseudo-physical state behind the synthetic source, modelled on
/// spirited canyon driving: a swinging lock command, throttle lifts and
/// stabs, slip spikes, and yaw/lateral-g that follow steering and speed.
///
/// Each `*_tick` advances the part of the model its channel owns and
/// returns a complete record for that channel.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    rng: ChaCha8Rng,
    t: f32,

    lock_command: f32,
    lock_dial: f32,
    slip: f32,
    surface: SurfaceState,

    throttle: f32,
    speed: f32,
    gear: u8,

    steering: f32,
    yaw: f32,
    lateral_g: f32,
    brake_pressure: f32,
}

impl SyntheticModel {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    fn with_rng(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            t: 0.0,
            lock_command: 40.0,
            lock_dial: 45.0,
            slip: 0.0,
            surface: SurfaceState::Dry,
            throttle: 50.0,
            speed: 80.0,
            gear: 3,
            steering: 0.0,
            yaw: 0.0,
            lateral_g: 0.0,
            brake_pressure: 0.0,
        }
    }

    pub fn tick(&mut self, id: MessageId, dt_s: f32) -> Record {
        match id {
            MessageId::Status => Record::Status(self.status_tick(dt_s)),
            MessageId::Context => Record::Context(self.context_tick()),
            MessageId::WheelSpeeds => Record::WheelSpeeds(self.wheel_tick()),
            MessageId::Dynamics => Record::Dynamics(self.dynamics_tick()),
        }
    }

    fn braking(&self) -> bool {
        self.throttle < BRAKING_THROTTLE
    }

    pub fn status_tick(&mut self, dt_s: f32) -> StatusRecord {
        self.t += dt_s;

        self.lock_command += self.rng.gen_range(-3.0..=3.0) + 2.0 * (self.t * 0.5).sin();
        self.lock_command = clamp(self.lock_command, LOCK_RANGE);

        // Dial follows the command loosely
        self.lock_dial += (self.lock_command - self.lock_dial) * 0.1 + self.rng.gen_range(-1.0..=1.0);
        self.lock_dial = clamp(self.lock_dial, LOCK_RANGE);

        self.slip += self.rng.gen_range(-0.5..=0.5);
        if self.rng.gen_bool(SLIP_SPIKE_PROBABILITY) {
            self.slip += self.rng.gen_range(-5.0..=8.0);
        }
        self.slip = clamp(self.slip * 0.95, SLIP_RANGE);

        if self.rng.gen_bool(SURFACE_CHANGE_PROBABILITY) {
            self.surface = SurfaceState::ALL[self.rng.gen_range(0..SurfaceState::ALL.len())];
        }

        let braking = self.braking();
        StatusRecord {
            lock_command_pct: self.lock_command,
            lock_dial_pct: Some(self.lock_dial),
            surface: self.surface,
            flags: StatusFlags {
                brake: braking,
                handbrake: false,
                abs_active: braking && self.slip.abs() > 5.0,
                stability_active: self.slip.abs() > 8.0,
            },
            slip_delta_kph: Some(self.slip),
        }
    }

    pub fn context_tick(&mut self) -> ContextRecord {
        self.throttle += self.rng.gen_range(-5.0..=5.0);
        if self.rng.gen_bool(LIFT_PROBABILITY) {
            self.throttle = self.rng.gen_range(0.0..=20.0);
        } else if self.rng.gen_bool(STOMP_PROBABILITY) {
            self.throttle = self.rng.gen_range(70.0..=100.0);
        }
        self.throttle = clamp(self.throttle, THROTTLE_RANGE);

        let target_speed = 40.0 + self.throttle * 1.2;
        self.speed += (target_speed - self.speed) * 0.05 + self.rng.gen_range(-2.0..=2.0);
        self.speed = clamp(self.speed, SPEED_RANGE);
        self.gear = gear_for_speed(self.speed);

        ContextRecord {
            gear: self.gear,
            speed_kph: self.speed,
            throttle_pct: self.throttle,
        }
    }

    /// Left/right split follows steering; a locked center diff narrows the
    /// rear split to a fraction of the open-diff value.
    pub fn wheel_tick(&mut self) -> WheelSpeedRecord {
        let base = self.speed;
        let steer = self.steering / STEERING_RANGE.1;
        let lock = self.lock_command / LOCK_RANGE.1;
        let rear_split = 0.03 * (1.0 - lock * 0.85);

        let fl = base * (1.0 - steer * 0.03) + self.rng.gen_range(-0.5..=0.5);
        let fr = base * (1.0 + steer * 0.03) + self.rng.gen_range(-0.5..=0.5);
        let rl = base * (1.0 - steer * rear_split) + self.rng.gen_range(-0.3..=0.3);
        let rr = base * (1.0 + steer * rear_split) + self.rng.gen_range(-0.3..=0.3);

        WheelSpeedRecord {
            front_left_kph: fl.max(0.0),
            front_right_kph: fr.max(0.0),
            rear_left_kph: rl.max(0.0),
            rear_right_kph: rr.max(0.0),
        }
    }

    pub fn dynamics_tick(&mut self) -> DynamicsRecord {
        self.steering += self.rng.gen_range(-15.0..=15.0) + 30.0 * (self.t * 0.3).sin();
        self.steering = clamp(self.steering * 0.95, STEERING_RANGE);

        let target_yaw = self.steering * self.speed / 5000.0;
        self.yaw += (target_yaw - self.yaw) * 0.3 + self.rng.gen_range(-1.0..=1.0);
        self.yaw = clamp(self.yaw, YAW_RANGE);

        let target_lat = self.yaw * self.speed / 3000.0;
        self.lateral_g += (target_lat - self.lateral_g) * 0.3 + self.rng.gen_range(-0.02..=0.02);
        self.lateral_g = clamp(self.lateral_g, LATERAL_G_RANGE);

        let target_brake = if self.braking() {
            (BRAKING_THROTTLE - self.throttle) * 3.0
        } else {
            0.0
        };
        self.brake_pressure += (target_brake - self.brake_pressure) * 0.3;
        self.brake_pressure = clamp(self.brake_pressure, BRAKE_RANGE);

        DynamicsRecord {
            steering_deg: self.steering,
            yaw_rate_dps: self.yaw,
            lateral_g: self.lateral_g,
            brake_pressure_bar: self.brake_pressure,
        }
    }
}
