//! Fixed-point yaw quantization for compact replication.
//!
//! A yaw angle in degrees is wrapped into `[-180, 180)` and mapped onto the
//! full `i16` range, one step being `360 / 65536` degrees (about 0.0055°).
//! The round trip loses at most half a step.

/// Degrees represented by one `i16` step.
pub const YAW_STEP_DEGREES: f32 = 360.0 / 65536.0;

/// Largest absolute error introduced by `quantize_yaw` + `dequantize_yaw`.
pub const YAW_MAX_ERROR_DEGREES: f32 = YAW_STEP_DEGREES * 0.5;

/// Wraps an angle into `[-180, 180)`.
pub fn wrap_degrees(degrees: f32) -> f32 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

pub fn quantize_yaw(degrees: f32) -> i16 {
    if !degrees.is_finite() {
        return 0;
    }
    let steps = (wrap_degrees(degrees) / YAW_STEP_DEGREES).round();
    // +180 rounds to 32768, which is the same angle as -180
    if steps >= 32768.0 {
        i16::MIN
    } else {
        steps as i16
    }
}

pub fn dequantize_yaw(q: i16) -> f32 {
    f32::from(q) * YAW_STEP_DEGREES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angular_error(a: f32, b: f32) -> f32 {
        wrap_degrees(a - b).abs()
    }

    #[test]
    fn error_stays_within_half_a_step() {
        for deg in [-179.99f32, -90.0, -0.004, 0.0, 12.345, 90.0, 179.999, 359.0, 725.5] {
            let back = dequantize_yaw(quantize_yaw(deg));
            assert!(
                angular_error(deg, back) <= YAW_MAX_ERROR_DEGREES + 1e-4,
                "{deg} -> {back}"
            );
        }
    }

    #[test]
    fn half_turn_maps_to_min() {
        assert_eq!(quantize_yaw(180.0), i16::MIN);
        assert_eq!(quantize_yaw(-180.0), i16::MIN);
        assert_eq!(dequantize_yaw(i16::MIN), -180.0);
    }

    #[test]
    fn non_finite_is_zero() {
        assert_eq!(quantize_yaw(f32::NAN), 0);
    }
}
