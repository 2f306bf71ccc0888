// Pre-write transforms for duty commands

use crate::config::RELAY_POWER_LIMIT;

/// Constrain the magnitude of `og` to `max`, keeping its sign
pub fn constrain_mag(og: i16, max: u16) -> i16 {
    // i16::MIN has no positive counterpart
    let mag = og.unsigned_abs().min(max).min(i16::MAX as u16) as i16;
    if og < 0 { -mag } else { mag }
}

/// Step from `last` toward `target` by at most `max_delta`, 0 disables the limit
pub fn ramp(last: i16, target: i16, max_delta: u16) -> i16 {
    if max_delta == 0 {
        return target;
    }

    let delta = i32::from(target) - i32::from(last);
    let step = i32::from(max_delta);
    let next = if delta > step {
        i32::from(last) + step
    } else if delta < -step {
        i32::from(last) - step
    } else {
        return target;
    };
    next as i16
}

/// Power accepted by a relay driver
pub fn relay_power(value: i32) -> i8 {
    value.clamp(-RELAY_POWER_LIMIT, RELAY_POWER_LIMIT) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrain_mag_bounds_and_sign() {
        for og in [-32768i16, -1000, -127, -1, 1, 5, 127, 300, 32767] {
            for max in [1u16, 50, 127, 300, 40000] {
                let out = constrain_mag(og, max);
                assert!(out.unsigned_abs() <= max, "|{out}| > {max}");
                assert_eq!(out.signum(), og.signum(), "sign of {og} lost at {max}");
            }
        }
        assert_eq!(constrain_mag(0, 10), 0);
        assert_eq!(constrain_mag(-300, 127), -127);
        assert_eq!(constrain_mag(100, 127), 100);
    }

    #[test]
    fn test_ramp_steps_toward_target() {
        assert_eq!(ramp(0, 300, 50), 50);
        assert_eq!(ramp(250, 300, 50), 300);
        assert_eq!(ramp(280, 300, 50), 300);
        assert_eq!(ramp(300, -300, 50), 250);
        assert_eq!(ramp(-10, -30, 50), -30);
    }

    #[test]
    fn test_ramp_never_overshoots() {
        let mut out = 0;
        let mut seen = vec![];
        while out != 300 {
            out = ramp(out, 300, 70);
            assert!(out <= 300);
            seen.push(out);
        }
        assert_eq!(seen, vec![70, 140, 210, 280, 300]);
    }

    #[test]
    fn test_ramp_disabled() {
        assert_eq!(ramp(0, 32767, 0), 32767);
        assert_eq!(ramp(i16::MIN, i16::MAX, u16::MAX), i16::MAX);
    }

    #[test]
    fn test_relay_power_clamp() {
        assert_eq!(relay_power(500), 127);
        assert_eq!(relay_power(-500), -127);
        assert_eq!(relay_power(-12), -12);
    }
}
