// Unit conversions between physical units and controller wire units
//
// The controller counts 2^16 steps per motor revolution behind a 2^7 gearbox,
// talks velocities in rpm and samples its recorder in 31.25 µs ticks.
// All rounding is round-half-to-even.

/// Motor encoder resolution: counts per motor revolution
pub const RESOLUTION_MOTOR: i64 = 1 << 16;

/// Gearbox reduction between motor and chair
pub const GEAR_RATIO: i64 = 1 << 7;

/// Counts per revolution of the chair (output shaft)
pub const RES_TOTAL: i64 = RESOLUTION_MOTOR * GEAR_RATIO;

/// Length of one recorder tick in microseconds
pub const RECORD_TICK_US: f64 = 31.25;

/// Round to two decimals (controller display precision)
///
/// Negative zero is folded into zero so it never prints as `-0.00`.
pub fn round_hundredths(value: f64) -> f64 {
    let rounded = (value * 100.0).round_ties_even() / 100.0;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Chair angle in degrees to position counts, floor division like the controller expects
pub fn degrees_to_counts(angle_deg: f64) -> i64 {
    (angle_deg * RES_TOTAL as f64 / 360.0).floor() as i64
}

/// Angular velocity in deg/s to rpm, rounded to two decimals
pub fn degrees_per_sec_to_rpm(angular_velocity_deg_s: f64) -> f64 {
    round_hundredths(angular_velocity_deg_s * 60.0 / 360.0)
}

/// Recorder sampling interval in seconds to 31.25 µs ticks
pub fn seconds_to_record_ticks(seconds: f64) -> i64 {
    (seconds * 1_000_000.0 / RECORD_TICK_US).round_ties_even() as i64
}

/// Seconds to whole milliseconds (jog durations)
pub fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round_ties_even() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_res_total() {
        assert_eq!(RES_TOTAL, 8_388_608);
    }

    #[test]
    fn test_degrees_to_counts_floors() {
        assert_eq!(degrees_to_counts(0.0), 0);
        assert_eq!(degrees_to_counts(360.0), 8_388_608);
        assert_eq!(degrees_to_counts(-360.0), -8_388_608);
        // 1 deg = 23301.68... counts
        assert_eq!(degrees_to_counts(1.0), 23_301);
        // Negative angles floor towards negative infinity
        assert_eq!(degrees_to_counts(-1.0), -23_302);
        assert_eq!(degrees_to_counts(0.5), 11_650);
        assert_eq!(degrees_to_counts(90.0), 2_097_152);
    }

    #[test]
    fn test_rpm_conversion() {
        assert_eq!(degrees_per_sec_to_rpm(0.0), 0.0);
        assert_eq!(degrees_per_sec_to_rpm(15.0), 2.5);
        assert_eq!(degrees_per_sec_to_rpm(-15.0), -2.5);
        assert_eq!(degrees_per_sec_to_rpm(360.0), 60.0);
        assert_eq!(degrees_per_sec_to_rpm(1.0), 0.17);
        // 0.75 deg/s = 0.125 rpm exactly, a tie that goes to even
        assert_eq!(degrees_per_sec_to_rpm(0.75), 0.12);
    }

    #[test]
    fn test_rpm_is_stable_under_rerounding() {
        for v in [-87.3, -12.345, -0.01, 0.0, 0.004, 3.3, 17.77, 59.9] {
            let rpm = degrees_per_sec_to_rpm(v);
            assert_eq!(round_hundredths(rpm), rpm, "not idempotent for {}", v);
        }
    }

    #[test]
    fn test_negative_zero_is_folded() {
        let r = round_hundredths(-0.001);
        assert_eq!(r, 0.0);
        assert!(r.is_sign_positive());
        assert_eq!(format!("{:.2}", r), "0.00");
    }

    #[test]
    fn test_record_ticks() {
        assert_eq!(seconds_to_record_ticks(31.25), 1_000_000);
        assert_eq!(seconds_to_record_ticks(0.0075), 240);
        assert_eq!(seconds_to_record_ticks(0.0), 0);
        assert_eq!(seconds_to_record_ticks(0.001), 32);
    }

    #[test]
    fn test_millis() {
        assert_eq!(seconds_to_millis(1.5), 1500);
        assert_eq!(seconds_to_millis(0.05), 50);
    }
}
