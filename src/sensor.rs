// Sensor reads, dispatched on the sensor's hardware kind
//
// Reads never fail loudly. A kind that cannot be served, or a bus that hands
// back an invalid value, yields a zero reading tagged with a fault.

use tracing::{debug, warn};

use crate::hal::{BusParam, Hardware};
use crate::registry::{Board, Registry, SensorKind};

/// Bus readings are saturated to the signed 16-bit domain, symmetric around 0
const READING_LIMIT: f32 = i16::MAX as f32;

/// Position feedback from a brushed pot is mapped onto 0..=POT_SPAN
const POT_SPAN: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// The controller reported the value as invalid or did not answer
    InvalidRead,
    /// No read routine exists for this kind or its wiring
    Unsupported,
}

/// A normalized signed reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub value: i32,
    pub fault: Option<SensorFault>,
}

impl Reading {
    fn ok(value: i32) -> Self {
        Self { value, fault: None }
    }

    fn sentinel(fault: SensorFault) -> Self {
        Self {
            value: 0,
            fault: Some(fault),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }
}

/// Read sensor `id`, updating its stored value and timestamp on success
///
/// # Panics
/// If `id` is not a sensor in `registry`
pub fn read_sensor(registry: &mut Registry, hw: &mut Hardware, id: usize) -> Reading {
    let kind = registry.sensor(id).kind;
    let reading = match kind {
        SensorKind::LimitPin => {
            let triggered = is_limit_triggered(registry, hw, id);
            Reading::ok(triggered as i32)
        }
        SensorKind::AnalogPotPin => Reading::ok(read_pot(registry, hw, id)),
        SensorKind::BrushedPot => read_position_pot(registry, hw, id),
        SensorKind::BrushedEncoder => read_duty_bus_speed(registry, hw, id),
        SensorKind::BrushlessEncoder => read_param(registry, hw, id, BusParam::EncoderVelocity),
        SensorKind::BrushlessPot => read_param(registry, hw, id, BusParam::EncoderPosition),
        SensorKind::BrushlessCurrent => read_param(registry, hw, id, BusParam::Current),
        SensorKind::LoadCell => Reading::ok(read_load_cell(registry, hw, id)),
        kind @ (SensorKind::None | SensorKind::BrushedCurrent | SensorKind::I2cBattery) => {
            warn!("Sensor {}: no read routine for {:?}", id, kind);
            Reading::sentinel(SensorFault::Unsupported)
        }
    };

    debug!("Sensor {} read: {:?}", id, reading);
    reading
}

/// Sample a limit switch, honoring its inverted flag
///
/// Returns false for anything that is not a limit pin.
pub fn is_limit_triggered(registry: &mut Registry, hw: &mut Hardware, id: usize) -> bool {
    let sensor = registry.sensor(id);
    if sensor.kind != SensorKind::LimitPin {
        return false;
    }

    let level = hw.pins.digital_read(sensor.pin);
    let triggered = level != sensor.inverted;

    let now = hw.clock.millis();
    let sensor = registry.sensor_mut(id);
    sensor.stored_val = if triggered { 1.0 } else { 0.0 };
    sensor.last_update_time = now;
    triggered
}

fn read_pot(registry: &mut Registry, hw: &mut Hardware, id: usize) -> i32 {
    let sensor = registry.sensor(id);
    let raw = hw.pins.analog_read(sensor.pin) / sensor.scale;
    let now = hw.clock.millis();
    registry.sensor_mut(id).smooth(f32::from(raw), now) as i32
}

/// Smoothed pot mapped from the owning motor's [min_pos, max_pos] onto 0..=1000
fn read_position_pot(registry: &mut Registry, hw: &mut Hardware, id: usize) -> Reading {
    let Some(motor) = registry.sensor(id).which_motor else {
        return Reading::sentinel(SensorFault::Unsupported);
    };
    let raw = read_pot(registry, hw, id);

    let motor = registry.motor(motor);
    let (lo, hi) = (motor.min_pos, motor.max_pos);
    if hi == lo {
        return Reading::ok(raw);
    }
    Reading::ok((raw - lo) * POT_SPAN / (hi - lo))
}

fn read_duty_bus_speed(registry: &mut Registry, hw: &mut Hardware, id: usize) -> Reading {
    let Some(m) = registry.sensor(id).which_motor else {
        return Reading::sentinel(SensorFault::Unsupported);
    };
    let motor = registry.motor(m);
    let addr = match registry.board_of(m) {
        Some(Board::SerialDuty { addr }) => addr,
        _ => motor.addr,
    };

    let speed = hw.duty.read_speed(addr, motor.channel);
    if !speed.valid {
        warn!(
            "Sensor {}: invalid speed from 0x{:02X}/{} (status 0x{:02X})",
            id, addr, motor.channel, speed.status
        );
        return Reading::sentinel(SensorFault::InvalidRead);
    }

    store_bus_value(registry, hw, id, speed.value as f32)
}

fn read_param(registry: &mut Registry, hw: &mut Hardware, id: usize, param: BusParam) -> Reading {
    let Some(m) = registry.sensor(id).which_motor else {
        return Reading::sentinel(SensorFault::Unsupported);
    };
    let Some(Board::Brushless { bus }) = registry.board_of(m) else {
        warn!("Sensor {}: motor {} has no brushless board", id, m);
        return Reading::sentinel(SensorFault::Unsupported);
    };
    let axis = registry.motor(m).channel;

    let Some(client) = hw.param_buses.get_mut(bus) else {
        warn!("Sensor {}: parameter bus {} not attached", id, bus);
        return Reading::sentinel(SensorFault::Unsupported);
    };
    match client.read_parameter(axis, param) {
        Some(value) => store_bus_value(registry, hw, id, value),
        None => Reading::sentinel(SensorFault::InvalidRead),
    }
}

fn store_bus_value(registry: &mut Registry, hw: &mut Hardware, id: usize, value: f32) -> Reading {
    if !value.is_finite() {
        warn!("Sensor {}: non-finite bus value {}", id, value);
        return Reading::sentinel(SensorFault::InvalidRead);
    }
    let clamped = value.clamp(-READING_LIMIT, READING_LIMIT);
    let now = hw.clock.millis();
    Reading::ok(registry.sensor_mut(id).smooth(clamped, now) as i32)
}

/// 24-bit shift-in on (clock = pin, data = pin + 1), three bytes MSB first
fn read_load_cell(registry: &mut Registry, hw: &mut Hardware, id: usize) -> i32 {
    let sensor = registry.sensor(id);
    let clock = sensor.pin;
    let data = sensor.pin.wrapping_add(1);

    let magnitude = (0..3).fold(0i32, |acc, _| {
        (acc << 8) | i32::from(hw.pins.shift_in_msb(data, clock))
    });
    let value = magnitude.saturating_mul(i32::from(sensor.scale));

    let now = hw.clock.millis();
    let sensor = registry.sensor_mut(id);
    sensor.stored_val = value as f32;
    sensor.last_update_time = now;
    value
}
