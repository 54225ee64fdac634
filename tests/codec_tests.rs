use ecu_bridge::codec::{
    decode, decode_context, decode_status, encode, requantize, ContextRecord, DecodeError,
    DynamicsRecord, Record, StatusFlags, StatusRecord, WheelSpeedRecord,
};
use ecu_bridge::schema::{MessageId, SurfaceState, FRAME_LEN};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn close(actual: f32, expected: f32, tol: f32) -> bool {
    (actual - expected).abs() <= tol
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[test]
    fn test_status_round_trip_brake_only() {
        let record = StatusRecord {
            lock_command_pct: 87.5,
            lock_dial_pct: Some(45.2),
            surface: SurfaceState::Dry,
            flags: StatusFlags { brake: true, ..StatusFlags::default() },
            slip_delta_kph: Some(2.34),
        };
        let bytes = encode(&Record::Status(record));
        assert_eq!(bytes, [0x03, 0x6B, 0x01, 0xC4, 0x00, 0x01, 0x00, 0xEA]);

        let decoded = decode_status(&bytes).unwrap();
        assert!(close(decoded.lock_command_pct, 87.5, 0.15));
        assert!(close(decoded.lock_dial_pct.unwrap(), 45.2, 0.15));
        assert!(close(decoded.slip_delta_kph.unwrap(), 2.34, 0.015));
        assert_eq!(decoded.surface, SurfaceState::Dry);
        assert!(decoded.flags.brake);
        assert!(!decoded.flags.handbrake);
        assert!(!decoded.flags.abs_active);
        assert!(!decoded.flags.stability_active);
    }

    #[test]
    fn test_context_neutral_idle_is_exact() {
        let bytes = encode(&Record::Context(ContextRecord::default()));
        assert_eq!(bytes, [0u8; FRAME_LEN]);

        let decoded = decode_context(&bytes).unwrap();
        assert_eq!(decoded.gear, 0);
        assert_eq!(decoded.speed_kph, 0.0);
        assert_eq!(decoded.throttle_pct, 0.0);
    }

    #[test]
    fn test_sentinels_decode_as_not_available() {
        // Every other byte varied; sentinels must win regardless
        for filler in [0x00u8, 0x5A, 0xFF] {
            let bytes = [filler, filler, 0xFF, 0xFF, filler, filler, 0x7F, 0xFF];
            let decoded = decode_status(&bytes).unwrap();
            assert_eq!(decoded.lock_dial_pct, None);
            assert_eq!(decoded.slip_delta_kph, None);
        }
    }

    #[test]
    fn test_missing_values_encode_to_sentinels() {
        let record = StatusRecord { lock_dial_pct: None, slip_delta_kph: None, ..StatusRecord::default() };
        let bytes = encode(&Record::Status(record));
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
        assert_eq!(&bytes[6..8], &[0x7F, 0xFF]);
    }

    #[test]
    fn test_signed_fields_decode_negative() {
        // steering -0.1 deg, yaw -327.68 dps, lateral -0.5 g, brake 12.3 bar
        let bytes = [0xFF, 0xFF, 0x80, 0x00, 0xFE, 0x0C, 0x00, 0x7B];
        let Record::Dynamics(d) = decode(MessageId::Dynamics, &bytes).unwrap() else {
            panic!("wrong record type");
        };
        assert!(close(d.steering_deg, -0.1, 1e-4));
        assert!(close(d.yaw_rate_dps, -327.68, 1e-3));
        assert!(close(d.lateral_g, -0.5, 1e-4));
        assert!(close(d.brake_pressure_bar, 12.3, 1e-4));
    }
}

#[cfg(test)]
mod length_tests {
    use super::*;

    #[test]
    fn test_short_frames_rejected() {
        for id in [MessageId::Status, MessageId::WheelSpeeds, MessageId::Dynamics] {
            for len in 0..FRAME_LEN {
                let data = vec![0u8; len];
                assert_eq!(
                    decode(id, &data),
                    Err(DecodeError::TooShort { id, len, need: FRAME_LEN }),
                    "{id} accepted {len} bytes"
                );
            }
            assert!(decode(id, &[0u8; FRAME_LEN]).is_ok());
        }
    }

    #[test]
    fn test_context_needs_five_bytes() {
        for len in 0..5 {
            let data = vec![0u8; len];
            assert_eq!(
                decode(MessageId::Context, &data),
                Err(DecodeError::TooShort { id: MessageId::Context, len, need: 5 })
            );
        }
        let decoded = decode_context(&[3, 0x1F, 0x40, 0x01, 0xF4]).unwrap();
        assert_eq!(decoded.gear, 3);
        assert!(close(decoded.speed_kph, 80.0, 1e-3));
        assert!(close(decoded.throttle_pct, 50.0, 1e-3));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut data = [0u8; 12];
        data[1] = 0x27;
        data[2] = 0x10;
        let decoded = decode_context(&data).unwrap();
        assert!(close(decoded.speed_kph, 100.0, 1e-3));
    }
}

#[cfg(test)]
mod field_tests {
    use super::*;

    #[test]
    fn test_every_surface_byte_decodes() {
        for raw in 0..=u8::MAX {
            let mut bytes = [0u8; FRAME_LEN];
            bytes[4] = raw;
            let surface = decode_status(&bytes).unwrap().surface;
            if raw < 4 {
                assert_eq!(surface.raw(), raw);
            } else {
                assert_eq!(surface, SurfaceState::Dry);
            }
        }
    }

    #[test]
    fn test_flag_combinations() {
        for bits in 0u8..16 {
            let mut bytes = [0u8; FRAME_LEN];
            bytes[5] = bits;
            let flags = decode_status(&bytes).unwrap().flags;
            assert_eq!(flags.brake, bits & 0x01 != 0);
            assert_eq!(flags.handbrake, bits & 0x02 != 0);
            assert_eq!(flags.abs_active, bits & 0x04 != 0);
            assert_eq!(flags.stability_active, bits & 0x08 != 0);
            assert_eq!(flags.bits(), bits);

            // Reserved high bits never leak into the flags
            bytes[5] = bits | 0xF0;
            assert_eq!(decode_status(&bytes).unwrap().flags, flags);
        }
    }

    #[test]
    fn test_out_of_range_values_saturate() {
        let record = Record::WheelSpeeds(WheelSpeedRecord {
            front_left_kph: -10.0,
            front_right_kph: 1_000.0,
            rear_left_kph: 0.0,
            rear_right_kph: 655.35,
        });
        let Record::WheelSpeeds(w) = requantize(&record).unwrap() else {
            panic!("wrong record type");
        };
        assert_eq!(w.front_left_kph, 0.0);
        assert!(close(w.front_right_kph, 655.35, 1e-2));
        assert!(close(w.rear_right_kph, 655.35, 1e-2));
    }
}

#[cfg(test)]
mod round_trip_tests {
    use super::*;

    fn random_record(rng: &mut ChaCha8Rng, id: MessageId) -> Record {
        match id {
            MessageId::Status => Record::Status(StatusRecord {
                lock_command_pct: rng.gen_range(0.0..=100.0),
                lock_dial_pct: rng.gen_bool(0.8).then(|| rng.gen_range(0.0..=100.0)),
                surface: SurfaceState::ALL[rng.gen_range(0..4)],
                flags: StatusFlags::from_bits(rng.gen_range(0..16)),
                slip_delta_kph: rng.gen_bool(0.8).then(|| rng.gen_range(-300.0..=300.0)),
            }),
            MessageId::Context => Record::Context(ContextRecord {
                gear: rng.gen_range(0..=6),
                speed_kph: rng.gen_range(0.0..=300.0),
                throttle_pct: rng.gen_range(0.0..=100.0),
            }),
            MessageId::WheelSpeeds => Record::WheelSpeeds(WheelSpeedRecord {
                front_left_kph: rng.gen_range(0.0..=300.0),
                front_right_kph: rng.gen_range(0.0..=300.0),
                rear_left_kph: rng.gen_range(0.0..=300.0),
                rear_right_kph: rng.gen_range(0.0..=300.0),
            }),
            MessageId::Dynamics => Record::Dynamics(DynamicsRecord {
                steering_deg: rng.gen_range(-540.0..=540.0),
                yaw_rate_dps: rng.gen_range(-120.0..=120.0),
                lateral_g: rng.gen_range(-2.0..=2.0),
                brake_pressure_bar: rng.gen_range(0.0..=200.0),
            }),
        }
    }

    fn within_half_step(original: &Record, decoded: &Record) -> bool {
        let opt = |a: Option<f32>, b: Option<f32>, tol: f32| match (a, b) {
            (Some(a), Some(b)) => close(a, b, tol),
            (None, None) => true,
            _ => false,
        };
        match (original, decoded) {
            (Record::Status(a), Record::Status(b)) => {
                close(a.lock_command_pct, b.lock_command_pct, 0.051)
                    && opt(a.lock_dial_pct, b.lock_dial_pct, 0.051)
                    && opt(a.slip_delta_kph, b.slip_delta_kph, 0.0051)
                    && a.surface == b.surface
                    && a.flags == b.flags
            }
            (Record::Context(a), Record::Context(b)) => {
                a.gear == b.gear
                    && close(a.speed_kph, b.speed_kph, 0.0051)
                    && close(a.throttle_pct, b.throttle_pct, 0.051)
            }
            (Record::WheelSpeeds(a), Record::WheelSpeeds(b)) => {
                close(a.front_left_kph, b.front_left_kph, 0.0051)
                    && close(a.front_right_kph, b.front_right_kph, 0.0051)
                    && close(a.rear_left_kph, b.rear_left_kph, 0.0051)
                    && close(a.rear_right_kph, b.rear_right_kph, 0.0051)
            }
            (Record::Dynamics(a), Record::Dynamics(b)) => {
                close(a.steering_deg, b.steering_deg, 0.051)
                    && close(a.yaw_rate_dps, b.yaw_rate_dps, 0.0051)
                    && close(a.lateral_g, b.lateral_g, 0.00051)
                    && close(a.brake_pressure_bar, b.brake_pressure_bar, 0.051)
            }
            _ => false,
        }
    }

    #[test]
    fn test_random_records_survive_the_wire() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x6A0);
        for _ in 0..2_000 {
            for id in MessageId::ALL {
                let record = random_record(&mut rng, id);
                let decoded = decode(id, &encode(&record)).unwrap();
                assert!(within_half_step(&record, &decoded), "{record:?} -> {decoded:?}");
            }
        }
    }

    #[test]
    fn test_requantize_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        for _ in 0..500 {
            for id in MessageId::ALL {
                let once = requantize(&random_record(&mut rng, id)).unwrap();
                assert_eq!(requantize(&once).unwrap(), once);
            }
        }
    }
}
