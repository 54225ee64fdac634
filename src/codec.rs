//! Pure decode/encode between raw frame payloads and typed records.
//!
//! No I/O and no shared state: every function here is deterministic given
//! the static layouts in [`crate::schema`].

use crate::schema::{
    FieldDescriptor, MessageId, MessageSchema, SurfaceState, CONTEXT_GEAR, CONTEXT_SPEED,
    CONTEXT_THROTTLE, DYN_BRAKE, DYN_LATERAL_G, DYN_STEERING, DYN_YAW, FLAG_ABS, FLAG_BRAKE,
    FLAG_HANDBRAKE, FLAG_STABILITY, FRAME_LEN, STATUS_FLAGS, STATUS_LOCK_CMD, STATUS_LOCK_DIAL,
    STATUS_SLIP, STATUS_SURFACE, WHEEL_FL, WHEEL_FR, WHEEL_RL, WHEEL_RR,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded frame payload.
pub type FrameBytes = [u8; FRAME_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{id} frame too short: {len} bytes (need {need})")]
    TooShort { id: MessageId, len: usize, need: usize },
}

/// Driver-aid flags from status byte 5. Each flag maps to exactly one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub brake: bool,
    pub handbrake: bool,
    pub abs_active: bool,
    pub stability_active: bool,
}

impl StatusFlags {
    /// Bits above bit 3 are reserved and ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            brake: bits & FLAG_BRAKE != 0,
            handbrake: bits & FLAG_HANDBRAKE != 0,
            abs_active: bits & FLAG_ABS != 0,
            stability_active: bits & FLAG_STABILITY != 0,
        }
    }

    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.brake {
            bits |= FLAG_BRAKE;
        }
        if self.handbrake {
            bits |= FLAG_HANDBRAKE;
        }
        if self.abs_active {
            bits |= FLAG_ABS;
        }
        if self.stability_active {
            bits |= FLAG_STABILITY;
        }
        bits
    }
}

/// Center-diff status (0x6A0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusRecord {
    pub lock_command_pct: f32,
    /// `None` when the ECU reports the dial as not available.
    pub lock_dial_pct: Option<f32>,
    pub surface: SurfaceState,
    pub flags: StatusFlags,
    /// km/h, `None` when not available.
    pub slip_delta_kph: Option<f32>,
}

/// Driving context (0x6A1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextRecord {
    /// 0 = neutral.
    pub gear: u8,
    pub speed_kph: f32,
    pub throttle_pct: f32,
}

/// Per-wheel speeds in km/h (0x6A2).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WheelSpeedRecord {
    pub front_left_kph: f32,
    pub front_right_kph: f32,
    pub rear_left_kph: f32,
    pub rear_right_kph: f32,
}

/// Chassis dynamics (0x6A3).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicsRecord {
    /// Degrees, negative = right.
    pub steering_deg: f32,
    pub yaw_rate_dps: f32,
    pub lateral_g: f32,
    pub brake_pressure_bar: f32,
}

/// One decoded frame of any known type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Status(StatusRecord),
    Context(ContextRecord),
    WheelSpeeds(WheelSpeedRecord),
    Dynamics(DynamicsRecord),
}

impl Record {
    pub fn message_id(&self) -> MessageId {
        match self {
            Record::Status(_) => MessageId::Status,
            Record::Context(_) => MessageId::Context,
            Record::WheelSpeeds(_) => MessageId::WheelSpeeds,
            Record::Dynamics(_) => MessageId::Dynamics,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes `data` as the message `id`.
///
/// Fails only when `data` is shorter than the message needs. Trailing
/// bytes beyond the layout are ignored.
pub fn decode(id: MessageId, data: &[u8]) -> Result<Record, DecodeError> {
    Ok(match id {
        MessageId::Status => Record::Status(decode_status(data)?),
        MessageId::Context => Record::Context(decode_context(data)?),
        MessageId::WheelSpeeds => Record::WheelSpeeds(decode_wheel_speeds(data)?),
        MessageId::Dynamics => Record::Dynamics(decode_dynamics(data)?),
    })
}

pub fn decode_status(data: &[u8]) -> Result<StatusRecord, DecodeError> {
    check_len(MessageId::Status, data)?;
    Ok(StatusRecord {
        lock_command_pct: read_scaled(data, &STATUS_LOCK_CMD),
        lock_dial_pct: read_optional(data, &STATUS_LOCK_DIAL),
        surface: SurfaceState::from_raw(data[STATUS_SURFACE.offset]),
        flags: StatusFlags::from_bits(data[STATUS_FLAGS.offset]),
        slip_delta_kph: read_optional(data, &STATUS_SLIP),
    })
}

pub fn decode_context(data: &[u8]) -> Result<ContextRecord, DecodeError> {
    check_len(MessageId::Context, data)?;
    Ok(ContextRecord {
        gear: data[CONTEXT_GEAR.offset],
        speed_kph: read_scaled(data, &CONTEXT_SPEED),
        throttle_pct: read_scaled(data, &CONTEXT_THROTTLE),
    })
}

pub fn decode_wheel_speeds(data: &[u8]) -> Result<WheelSpeedRecord, DecodeError> {
    check_len(MessageId::WheelSpeeds, data)?;
    Ok(WheelSpeedRecord {
        front_left_kph: read_scaled(data, &WHEEL_FL),
        front_right_kph: read_scaled(data, &WHEEL_FR),
        rear_left_kph: read_scaled(data, &WHEEL_RL),
        rear_right_kph: read_scaled(data, &WHEEL_RR),
    })
}

pub fn decode_dynamics(data: &[u8]) -> Result<DynamicsRecord, DecodeError> {
    check_len(MessageId::Dynamics, data)?;
    Ok(DynamicsRecord {
        steering_deg: read_scaled(data, &DYN_STEERING),
        yaw_rate_dps: read_scaled(data, &DYN_YAW),
        lateral_g: read_scaled(data, &DYN_LATERAL_G),
        brake_pressure_bar: read_scaled(data, &DYN_BRAKE),
    })
}

fn check_len(id: MessageId, data: &[u8]) -> Result<&'static MessageSchema, DecodeError> {
    let schema = id.schema();
    if data.len() < schema.min_len {
        return Err(DecodeError::TooShort {
            id,
            len: data.len(),
            need: schema.min_len,
        });
    }
    Ok(schema)
}

/// Raw integer value of a field. Callers have already checked the length.
fn read_raw(data: &[u8], field: &FieldDescriptor) -> i32 {
    let o = field.offset;
    match (field.width, field.signed) {
        (1, false) => i32::from(data[o]),
        (1, true) => i32::from(i8::from_be_bytes([data[o]])),
        (_, false) => i32::from(u16::from_be_bytes([data[o], data[o + 1]])),
        (_, true) => i32::from(i16::from_be_bytes([data[o], data[o + 1]])),
    }
}

#[allow(clippy::cast_precision_loss)]
fn read_scaled(data: &[u8], field: &FieldDescriptor) -> f32 {
    read_raw(data, field) as f32 * field.scale
}

#[allow(clippy::cast_precision_loss)]
fn read_optional(data: &[u8], field: &FieldDescriptor) -> Option<f32> {
    let raw = read_raw(data, field);
    if field.sentinel == Some(raw) {
        None
    } else {
        Some(raw as f32 * field.scale)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a record into its 8-byte wire form.
///
/// Values are rounded to the nearest scale step and saturated to the
/// field's raw range. A present value never encodes onto the sentinel.
pub fn encode(record: &Record) -> FrameBytes {
    match record {
        Record::Status(r) => encode_status(r),
        Record::Context(r) => encode_context(r),
        Record::WheelSpeeds(r) => encode_wheel_speeds(r),
        Record::Dynamics(r) => encode_dynamics(r),
    }
}

pub fn encode_status(record: &StatusRecord) -> FrameBytes {
    let mut buf = [0u8; FRAME_LEN];
    write_scaled(&mut buf, &STATUS_LOCK_CMD, record.lock_command_pct);
    write_optional(&mut buf, &STATUS_LOCK_DIAL, record.lock_dial_pct);
    buf[STATUS_SURFACE.offset] = record.surface.raw();
    buf[STATUS_FLAGS.offset] = record.flags.bits();
    write_optional(&mut buf, &STATUS_SLIP, record.slip_delta_kph);
    buf
}

pub fn encode_context(record: &ContextRecord) -> FrameBytes {
    let mut buf = [0u8; FRAME_LEN];
    buf[CONTEXT_GEAR.offset] = record.gear;
    write_scaled(&mut buf, &CONTEXT_SPEED, record.speed_kph);
    write_scaled(&mut buf, &CONTEXT_THROTTLE, record.throttle_pct);
    buf
}

pub fn encode_wheel_speeds(record: &WheelSpeedRecord) -> FrameBytes {
    let mut buf = [0u8; FRAME_LEN];
    write_scaled(&mut buf, &WHEEL_FL, record.front_left_kph);
    write_scaled(&mut buf, &WHEEL_FR, record.front_right_kph);
    write_scaled(&mut buf, &WHEEL_RL, record.rear_left_kph);
    write_scaled(&mut buf, &WHEEL_RR, record.rear_right_kph);
    buf
}

pub fn encode_dynamics(record: &DynamicsRecord) -> FrameBytes {
    let mut buf = [0u8; FRAME_LEN];
    write_scaled(&mut buf, &DYN_STEERING, record.steering_deg);
    write_scaled(&mut buf, &DYN_YAW, record.yaw_rate_dps);
    write_scaled(&mut buf, &DYN_LATERAL_G, record.lateral_g);
    write_scaled(&mut buf, &DYN_BRAKE, record.brake_pressure_bar);
    buf
}

/// Runs a record through the wire format and back, snapping every value
/// onto the precision a real frame would carry.
pub fn requantize(record: &Record) -> Result<Record, DecodeError> {
    decode(record.message_id(), &encode(record))
}

/// Nearest raw value for `value`, saturated and kept off the sentinel.
#[allow(clippy::cast_possible_truncation)]
fn to_raw(field: &FieldDescriptor, value: f32) -> i32 {
    let (mut lo, mut hi) = field.raw_range();
    if field.sentinel == Some(hi) {
        hi -= 1;
    }
    if field.sentinel == Some(lo) {
        lo += 1;
    }
    // `as` saturates and maps NaN to 0
    let raw = (f64::from(value) / f64::from(field.scale)).round() as i32;
    raw.clamp(lo, hi)
}

fn write_raw(buf: &mut FrameBytes, field: &FieldDescriptor, raw: i32) {
    let o = field.offset;
    match (field.width, field.signed) {
        (1, false) => buf[o] = raw as u8,
        (1, true) => buf[o] = (raw as i8).to_be_bytes()[0],
        (_, false) => buf[o..o + 2].copy_from_slice(&(raw as u16).to_be_bytes()),
        (_, true) => buf[o..o + 2].copy_from_slice(&(raw as i16).to_be_bytes()),
    }
}

fn write_scaled(buf: &mut FrameBytes, field: &FieldDescriptor, value: f32) {
    write_raw(buf, field, to_raw(field, value));
}

fn write_optional(buf: &mut FrameBytes, field: &FieldDescriptor, value: Option<f32>) {
    match (value, field.sentinel) {
        (Some(v), _) => write_scaled(buf, field, v),
        (None, Some(sentinel)) => write_raw(buf, field, sentinel),
        (None, None) => write_raw(buf, field, 0),
    }
}
