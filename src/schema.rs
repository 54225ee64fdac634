//! Static layout of the four ECU publish-bus messages.
//!
//! Every multi-byte field is big-endian. Each message occupies a fixed
//! 8-byte frame; the context message only carries meaningful data in its
//! first five bytes, so it can be decoded from a shorter buffer.

use core::fmt;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Payload length of every publish-bus frame.
pub const FRAME_LEN: usize = 8;

// Arbitration identifiers (wire-exact)
pub const STATUS_FRAME_ID: u32 = 0x6A0;
pub const CONTEXT_FRAME_ID: u32 = 0x6A1;
pub const WHEEL_SPEED_FRAME_ID: u32 = 0x6A2;
pub const DYNAMICS_FRAME_ID: u32 = 0x6A3;

/// Identifiers the listener accepts; everything else on the bus is ignored.
pub const FILTER_IDS: [u32; 4] = [
    STATUS_FRAME_ID,
    CONTEXT_FRAME_ID,
    WHEEL_SPEED_FRAME_ID,
    DYNAMICS_FRAME_ID,
];

// Status flag bits (byte 5)
pub const FLAG_BRAKE: u8 = 0x01;
pub const FLAG_HANDBRAKE: u8 = 0x02;
pub const FLAG_ABS: u8 = 0x04;
pub const FLAG_STABILITY: u8 = 0x08;

pub const DIAL_NOT_AVAILABLE: u16 = 0xFFFF;
pub const SLIP_NOT_AVAILABLE: i16 = 0x7FFF;

/// Message types carried on the publish bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Status,
    Context,
    WheelSpeeds,
    Dynamics,
}

impl MessageId {
    pub const ALL: [MessageId; 4] = [
        MessageId::Status,
        MessageId::Context,
        MessageId::WheelSpeeds,
        MessageId::Dynamics,
    ];

    /// Maps an arbitration identifier onto a known message, `None` for
    /// anything outside the filter set.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            STATUS_FRAME_ID => Some(MessageId::Status),
            CONTEXT_FRAME_ID => Some(MessageId::Context),
            WHEEL_SPEED_FRAME_ID => Some(MessageId::WheelSpeeds),
            DYNAMICS_FRAME_ID => Some(MessageId::Dynamics),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            MessageId::Status => STATUS_FRAME_ID,
            MessageId::Context => CONTEXT_FRAME_ID,
            MessageId::WheelSpeeds => WHEEL_SPEED_FRAME_ID,
            MessageId::Dynamics => DYNAMICS_FRAME_ID,
        }
    }

    pub fn schema(self) -> &'static MessageSchema {
        match self {
            MessageId::Status => &STATUS_SCHEMA,
            MessageId::Context => &CONTEXT_SCHEMA,
            MessageId::WheelSpeeds => &WHEEL_SPEED_SCHEMA,
            MessageId::Dynamics => &DYNAMICS_SCHEMA,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:03X})", self.schema().name, self.raw())
    }
}

/// Road surface classification carried in status byte 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurfaceState {
    #[default]
    Dry,
    Wet,
    Cold,
    LowGrip,
}

impl SurfaceState {
    pub const ALL: [SurfaceState; 4] = [
        SurfaceState::Dry,
        SurfaceState::Wet,
        SurfaceState::Cold,
        SurfaceState::LowGrip,
    ];

    /// Out-of-range bytes degrade to `Dry` instead of failing the frame.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SurfaceState::Wet,
            2 => SurfaceState::Cold,
            3 => SurfaceState::LowGrip,
            _ => SurfaceState::Dry,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            SurfaceState::Dry => 0,
            SurfaceState::Wet => 1,
            SurfaceState::Cold => 2,
            SurfaceState::LowGrip => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SurfaceState::Dry => "DRY",
            SurfaceState::Wet => "WET",
            SurfaceState::Cold => "COLD",
            SurfaceState::LowGrip => "LOW GRIP",
        }
    }
}

impl fmt::Display for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Location and scaling of one numeric field inside a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub offset: usize,
    /// Width in bytes: 1 or 2.
    pub width: usize,
    pub signed: bool,
    pub scale: f32,
    /// Raw value reserved for "not available", compared before scaling.
    pub sentinel: Option<i32>,
}

impl FieldDescriptor {
    const fn unsigned16(name: &'static str, offset: usize, scale: f32) -> Self {
        Self { name, offset, width: 2, signed: false, scale, sentinel: None }
    }

    const fn signed16(name: &'static str, offset: usize, scale: f32) -> Self {
        Self { name, offset, width: 2, signed: true, scale, sentinel: None }
    }

    const fn byte(name: &'static str, offset: usize) -> Self {
        Self { name, offset, width: 1, signed: false, scale: 1.0, sentinel: None }
    }

    const fn with_sentinel(mut self, raw: i32) -> Self {
        self.sentinel = Some(raw);
        self
    }

    /// Last byte index (exclusive) the field touches.
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Smallest and largest raw integer the field can carry.
    pub fn raw_range(&self) -> (i32, i32) {
        match (self.width, self.signed) {
            (1, false) => (0, i32::from(u8::MAX)),
            (1, true) => (i32::from(i8::MIN), i32::from(i8::MAX)),
            (_, false) => (0, i32::from(u16::MAX)),
            (_, true) => (i32::from(i16::MIN), i32::from(i16::MAX)),
        }
    }
}

/// Static description of one message type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageSchema {
    pub id: u32,
    pub name: &'static str,
    pub frame_len: usize,
    /// Bytes that must be present for a decode to succeed.
    pub min_len: usize,
    pub fields: &'static [FieldDescriptor],
}

impl MessageSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// Status (0x6A0)
pub const STATUS_LOCK_CMD: FieldDescriptor = FieldDescriptor::unsigned16("lock_command_pct", 0, 0.1);
pub const STATUS_LOCK_DIAL: FieldDescriptor =
    FieldDescriptor::unsigned16("lock_dial_pct", 2, 0.1).with_sentinel(DIAL_NOT_AVAILABLE as i32);
pub const STATUS_SURFACE: FieldDescriptor = FieldDescriptor::byte("surface", 4);
pub const STATUS_FLAGS: FieldDescriptor = FieldDescriptor::byte("flags", 5);
pub const STATUS_SLIP: FieldDescriptor =
    FieldDescriptor::signed16("slip_delta_kph", 6, 0.01).with_sentinel(SLIP_NOT_AVAILABLE as i32);

// Context (0x6A1), bytes 5-7 reserved
pub const CONTEXT_GEAR: FieldDescriptor = FieldDescriptor::byte("gear", 0);
pub const CONTEXT_SPEED: FieldDescriptor = FieldDescriptor::unsigned16("speed_kph", 1, 0.01);
pub const CONTEXT_THROTTLE: FieldDescriptor = FieldDescriptor::unsigned16("throttle_pct", 3, 0.1);

// Wheel speeds (0x6A2)
pub const WHEEL_FL: FieldDescriptor = FieldDescriptor::unsigned16("front_left_kph", 0, 0.01);
pub const WHEEL_FR: FieldDescriptor = FieldDescriptor::unsigned16("front_right_kph", 2, 0.01);
pub const WHEEL_RL: FieldDescriptor = FieldDescriptor::unsigned16("rear_left_kph", 4, 0.01);
pub const WHEEL_RR: FieldDescriptor = FieldDescriptor::unsigned16("rear_right_kph", 6, 0.01);

// Dynamics (0x6A3)
pub const DYN_STEERING: FieldDescriptor = FieldDescriptor::signed16("steering_deg", 0, 0.1);
pub const DYN_YAW: FieldDescriptor = FieldDescriptor::signed16("yaw_rate_dps", 2, 0.01);
pub const DYN_LATERAL_G: FieldDescriptor = FieldDescriptor::signed16("lateral_g", 4, 0.001);
pub const DYN_BRAKE: FieldDescriptor = FieldDescriptor::unsigned16("brake_pressure_bar", 6, 0.1);

pub static STATUS_SCHEMA: MessageSchema = MessageSchema {
    id: STATUS_FRAME_ID,
    name: "STATUS",
    frame_len: FRAME_LEN,
    min_len: FRAME_LEN,
    fields: &[STATUS_LOCK_CMD, STATUS_LOCK_DIAL, STATUS_SURFACE, STATUS_FLAGS, STATUS_SLIP],
};

pub static CONTEXT_SCHEMA: MessageSchema = MessageSchema {
    id: CONTEXT_FRAME_ID,
    name: "CONTEXT",
    frame_len: FRAME_LEN,
    min_len: CONTEXT_THROTTLE.end(),
    fields: &[CONTEXT_GEAR, CONTEXT_SPEED, CONTEXT_THROTTLE],
};

pub static WHEEL_SPEED_SCHEMA: MessageSchema = MessageSchema {
    id: WHEEL_SPEED_FRAME_ID,
    name: "WHEEL_SPEED",
    frame_len: FRAME_LEN,
    min_len: FRAME_LEN,
    fields: &[WHEEL_FL, WHEEL_FR, WHEEL_RL, WHEEL_RR],
};

pub static DYNAMICS_SCHEMA: MessageSchema = MessageSchema {
    id: DYNAMICS_FRAME_ID,
    name: "DYNAMICS",
    frame_len: FRAME_LEN,
    min_len: FRAME_LEN,
    fields: &[DYN_STEERING, DYN_YAW, DYN_LATERAL_G, DYN_BRAKE],
};

// Every field must fit inside the fixed frame.
const_assert!(STATUS_SLIP.end() <= FRAME_LEN);
const_assert!(CONTEXT_THROTTLE.end() == 5);
const_assert!(WHEEL_RR.end() <= FRAME_LEN);
const_assert!(DYN_BRAKE.end() <= FRAME_LEN);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_mapping_is_bijective() {
        for id in MessageId::ALL {
            assert_eq!(MessageId::from_raw(id.raw()), Some(id));
            assert_eq!(id.schema().id, id.raw());
        }
        assert_eq!(MessageId::from_raw(0x6A4), None);
        assert_eq!(MessageId::from_raw(0x000), None);
    }

    #[test]
    fn test_fields_do_not_overlap() {
        for id in MessageId::ALL {
            let schema = id.schema();
            for (i, a) in schema.fields.iter().enumerate() {
                assert!(a.end() <= schema.frame_len, "{} overflows", a.name);
                for b in &schema.fields[i + 1..] {
                    assert!(a.end() <= b.offset || b.end() <= a.offset, "{} overlaps {}", a.name, b.name);
                }
            }
        }
    }

    #[test]
    fn test_surface_fallback() {
        for raw in 4..=u8::MAX {
            assert_eq!(SurfaceState::from_raw(raw), SurfaceState::Dry);
        }
        for surface in SurfaceState::ALL {
            assert_eq!(SurfaceState::from_raw(surface.raw()), surface);
        }
    }
}
