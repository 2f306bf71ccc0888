// Motor writes, dispatched on the motor's hardware kind
//
// `last_set`, `integral` and `last_update_time` only change here, and only
// after the hardware accepted the write.

use tracing::{debug, warn};

use super::select::SelectLine;
use super::shaping::{constrain_mag, ramp, relay_power};
use crate::config::SELECT_SETTLE_US;
use crate::hal::Hardware;
use crate::registry::{Board, MotorKind, Registry};
use crate::sensor::read_sensor;

/// What a motor write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The hardware accepted a new output
    Written,
    /// Output already matches the set-point, nothing sent
    Unchanged,
    /// Nothing was written; retry next cycle
    Failed,
}

impl WriteStatus {
    pub fn is_failed(self) -> bool {
        self == WriteStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Interlock stop: no ramp, no debounce, closed-loop output forced to 0
    Halt,
}

/// Drive motor `id` toward its set-point
///
/// # Panics
/// If `id` is not a motor in `registry`
pub fn write_motor(registry: &mut Registry, hw: &mut Hardware, id: usize) -> WriteStatus {
    drive(registry, hw, id, Mode::Normal)
}

/// Zero the set-point of motor `id` and write it out immediately
pub fn halt_motor(registry: &mut Registry, hw: &mut Hardware, id: usize) -> WriteStatus {
    registry.motor_mut(id).set_pt = 0;
    drive(registry, hw, id, Mode::Halt)
}

fn drive(registry: &mut Registry, hw: &mut Hardware, id: usize, mode: Mode) -> WriteStatus {
    let kind = registry.motor(id).kind;
    let status = match kind {
        MotorKind::SerialDuty => write_serial_duty(registry, hw, id, mode),
        MotorKind::BrushedPwm => write_relay_pwm(registry, hw, id, false),
        MotorKind::BrushedPwmBoth => write_relay_pwm(registry, hw, id, true),
        MotorKind::BrushedPosition => write_relay_position(registry, hw, id, mode),
        MotorKind::BrushlessVelocity | MotorKind::BrushlessPosition => {
            write_brushless(registry, hw, id, mode)
        }
        MotorKind::DirectPinPwm => write_pin_pwm(registry, hw, id),
        MotorKind::None => WriteStatus::Failed,
        MotorKind::BrushlessUart | MotorKind::BrushlessPositionBoth | MotorKind::All => {
            warn!("Motor {}: no write routine for {:?}", id, kind);
            WriteStatus::Failed
        }
    };

    if status.is_failed() && kind != MotorKind::None {
        warn!("Motor {}: write failed", id);
    }
    status
}

/// Record an accepted write
fn commit(registry: &mut Registry, hw: &Hardware, id: usize, written: i16) -> WriteStatus {
    let now = hw.clock.millis();
    let motor = registry.motor_mut(id);
    motor.last_set = written;
    motor.last_update_time = now;
    WriteStatus::Written
}

fn write_serial_duty(registry: &mut Registry, hw: &mut Hardware, id: usize, mode: Mode) -> WriteStatus {
    let addr = match registry.board_of(id) {
        Some(Board::SerialDuty { addr }) => addr,
        _ => return WriteStatus::Failed,
    };

    let motor = registry.motor_mut(id);
    let target = constrain_mag(motor.set_pt, motor.max_duty);
    motor.set_pt = target;

    if mode == Mode::Normal && target == motor.last_set {
        return WriteStatus::Unchanged;
    }
    let out = match mode {
        Mode::Normal => ramp(motor.last_set, target, motor.max_delta),
        Mode::Halt => target,
    };
    let wire = if motor.reversed { -out } else { out };
    let channel = motor.channel;

    debug!(
        "Motor {}: duty {} -> 0x{:02X}/{} (target {})",
        id, wire, addr, channel, target
    );
    if !hw.duty.set_duty(addr, channel, wire) {
        return WriteStatus::Failed;
    }
    commit(registry, hw, id, out)
}

/// Send one command to a relay driver board inside its select window
fn write_relay(hw: &mut Hardware, select_pin: u8, channels: &[u8], power: i8) -> bool {
    let _select = SelectLine::assert(hw.pins.as_mut(), select_pin);
    let ok = channels
        .iter()
        .fold(true, |ok, &channel| hw.relay.drive(channel, power) && ok);
    hw.clock.delay_us(SELECT_SETTLE_US);
    ok
}

fn relay_select_pin(registry: &Registry, id: usize) -> Option<u8> {
    match registry.board_of(id) {
        Some(Board::RelayPair { select_pin }) => Some(select_pin),
        _ => None,
    }
}

fn write_relay_pwm(registry: &mut Registry, hw: &mut Hardware, id: usize, both: bool) -> WriteStatus {
    let Some(select_pin) = relay_select_pin(registry, id) else {
        return WriteStatus::Failed;
    };
    let motor = registry.motor(id);
    let power = relay_power(i32::from(motor.set_pt));
    let wire = if motor.reversed { -power } else { power };
    let channels = if both {
        vec![1, 2]
    } else {
        vec![motor.channel + 1]
    };

    debug!("Motor {}: relay power {} on {:?}", id, wire, channels);
    if !write_relay(hw, select_pin, &channels, wire) {
        return WriteStatus::Failed;
    }
    commit(registry, hw, id, i16::from(power))
}

/// PI position loop closed through the motor's feedback sensor
fn write_relay_position(registry: &mut Registry, hw: &mut Hardware, id: usize, mode: Mode) -> WriteStatus {
    let Some(select_pin) = relay_select_pin(registry, id) else {
        return WriteStatus::Failed;
    };
    let channel = registry.motor(id).channel + 1;

    if mode == Mode::Halt {
        debug!("Motor {}: halting position loop", id);
        if !write_relay(hw, select_pin, &[channel], 0) {
            return WriteStatus::Failed;
        }
        registry.motor_mut(id).integral = 0.0;
        return commit(registry, hw, id, 0);
    }

    let Some(feedback) = registry.motor(id).feedback_sensor else {
        return WriteStatus::Failed;
    };
    let position = read_sensor(registry, hw, feedback);
    if !position.is_ok() {
        warn!("Motor {}: no position feedback from sensor {}", id, feedback);
        return WriteStatus::Failed;
    }

    let now = hw.clock.millis();
    let motor = registry.motor(id);
    let dt = now.wrapping_sub(motor.last_update_time) as f32;

    let mut error = i32::from(motor.set_pt) - position.value;
    if error.unsigned_abs() <= motor.deadband {
        error = 0;
    }
    let error = error as f32;
    let integral = (motor.integral + error * dt).clamp(-motor.saturation, motor.saturation);
    let output = motor.kp * error + motor.ki * integral;

    let power = relay_power(output as i32);
    let wire = if motor.reversed { -power } else { power };

    debug!(
        "Motor {}: position {} target {} -> power {}",
        id, position.value, motor.set_pt, wire
    );
    if !write_relay(hw, select_pin, &[channel], wire) {
        return WriteStatus::Failed;
    }
    registry.motor_mut(id).integral = integral;
    commit(registry, hw, id, i16::from(power))
}

fn write_brushless(registry: &mut Registry, hw: &mut Hardware, id: usize, mode: Mode) -> WriteStatus {
    let Some(Board::Brushless { bus }) = registry.board_of(id) else {
        return WriteStatus::Failed;
    };
    let motor = registry.motor(id);
    if mode == Mode::Normal && motor.set_pt == motor.last_set {
        return WriteStatus::Unchanged;
    }

    let Some(client) = hw.param_buses.get_mut(bus) else {
        return WriteStatus::Failed;
    };
    let value = f32::from(motor.set_pt) * f32::from(motor.scale);
    let ok = match motor.kind {
        MotorKind::BrushlessVelocity => client.set_velocity(motor.channel, value),
        _ => client.set_position(motor.channel, value),
    };

    debug!("Motor {}: {:?} {} on bus {}", id, motor.kind, value, bus);
    if !ok {
        return WriteStatus::Failed;
    }
    let written = motor.set_pt;
    commit(registry, hw, id, written)
}

fn write_pin_pwm(registry: &mut Registry, hw: &mut Hardware, id: usize) -> WriteStatus {
    let motor = registry.motor(id);
    let duty = motor.set_pt.clamp(0, 255) as u8;
    hw.pins.pwm_write(motor.addr, duty);
    commit(registry, hw, id, i16::from(duty))
}
