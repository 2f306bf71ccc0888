// Hardware collaborators used by the control core
//
// The core never touches a bus or a pin directly. Everything goes through
// these traits so a board bring-up layer (or the simulator in `sim`) can
// supply the real thing.

/// Pin-level sampling and output primitives, keyed by pin id
pub trait Pins {
    /// Instantaneous digital level of a pin
    fn digital_read(&mut self, pin: u8) -> bool;

    fn digital_write(&mut self, pin: u8, high: bool);

    /// Raw analog sample (10-bit on most boards)
    fn analog_read(&mut self, pin: u8) -> u16;

    /// PWM output, 0..=255
    fn pwm_write(&mut self, pin: u8, duty: u8);

    /// Clock in one byte on `data`, most-significant bit first, toggling `clock`
    fn shift_in_msb(&mut self, data: u8, clock: u8) -> u8;
}

/// Monotonic millisecond clock plus a short blocking delay
pub trait Clock {
    /// Milliseconds since start, wraps at u32::MAX
    fn millis(&self) -> u32;

    fn delay_us(&mut self, us: u32);
}

/// Result of a "read speed" request on the duty controller bus
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedReading {
    pub value: i32,
    pub status: u8,
    pub valid: bool,
}

/// Bus-addressed bidirectional duty controller (packet serial)
pub trait DutyBus {
    /// Set signed duty on channel `channel` of the board at `addr`
    fn set_duty(&mut self, addr: u8, channel: u8, duty: i16) -> bool;

    fn read_speed(&mut self, addr: u8, channel: u8) -> SpeedReading;
}

/// Relay-style driver shared by every select-line multiplexed board
///
/// Only the board whose select line is asserted listens to the command.
pub trait RelayDriver {
    /// `channel` is 1 or 2, `power` is -127..=127
    fn drive(&mut self, channel: u8, power: i8) -> bool;
}

/// Parameters readable from a brushless controller axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusParam {
    EncoderPosition,
    EncoderVelocity,
    Current,
}

/// Brushless controller reached through a parameter bus
pub trait ParamBus {
    fn set_velocity(&mut self, axis: u8, velocity: f32) -> bool;

    fn set_position(&mut self, axis: u8, position: f32) -> bool;

    /// `None` when the controller did not return a usable value
    fn read_parameter(&mut self, axis: u8, param: BusParam) -> Option<f32>;
}

/// Every collaborator the core calls into, handed over at construction
pub struct Hardware {
    pub pins: Box<dyn Pins>,
    pub clock: Box<dyn Clock>,
    pub duty: Box<dyn DutyBus>,
    pub relay: Box<dyn RelayDriver>,
    /// Indexed by `Board::Brushless { bus }`
    pub param_buses: Vec<Box<dyn ParamBus>>,
}
