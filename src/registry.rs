// Sensor and motor registries
//
// Built once from configuration (see `config`), then only record fields
// change. Ids are plain indices into the registries.

use serde::Deserialize;

/// Hardware behind a sensor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[default]
    None,
    BrushlessPot,
    BrushlessEncoder,
    BrushlessCurrent,
    BrushedPot,
    BrushedEncoder,
    BrushedCurrent,
    I2cBattery,
    LimitPin,
    AnalogPotPin,
    LoadCell,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorRecord {
    #[serde(default)]
    pub kind: SensorKind,
    /// Bus address, for bus-addressed kinds
    #[serde(default)]
    pub addr: u8,
    /// Owning motor for feedback kinds, bound motor for limit switches
    #[serde(default)]
    pub which_motor: Option<usize>,
    /// Physical pin; a load cell uses this as clock and `pin + 1` as data
    #[serde(default)]
    pub pin: u8,
    #[serde(default)]
    pub inverted: bool,
    /// Limit switches only: the direction of travel (+1 / -1) this switch blocks
    #[serde(default)]
    pub trip_direction: i8,
    /// Smoothing weight in [0, 1], 1 = unfiltered
    #[serde(default = "default_responsiveness")]
    pub responsiveness: f32,
    #[serde(default = "default_scale")]
    pub scale: u16,

    #[serde(skip)]
    pub stored_val: f32,
    #[serde(skip)]
    pub last_update_time: u32,
}

impl SensorRecord {
    /// Fold a raw sample into the stored value: `stored*(1-r) + raw*r`
    pub fn smooth(&mut self, raw: f32, now: u32) -> f32 {
        let r = self.responsiveness;
        self.stored_val = self.stored_val * (1.0 - r) + raw * r;
        self.last_update_time = now;
        self.stored_val
    }
}

/// Hardware behind a motor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorKind {
    #[default]
    None,
    BrushlessUart,
    BrushlessVelocity,
    BrushlessPosition,
    BrushlessPositionBoth,
    /// Open-loop duty through a relay driver board
    BrushedPwm,
    /// Closed-loop (PI) position through a relay driver board
    BrushedPosition,
    /// Same power on both channels of a relay driver board
    BrushedPwmBoth,
    /// Signed duty through a bus-addressed serial duty controller
    SerialDuty,
    DirectPinPwm,
    All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorRecord {
    #[serde(default)]
    pub kind: MotorKind,
    /// Bus address, or the output pin for `DirectPinPwm`
    #[serde(default)]
    pub addr: u8,
    /// Sub-index on the controller board (0 or 1)
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_scale")]
    pub scale: u16,
    #[serde(default)]
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
    #[serde(default)]
    pub qpps: u32,
    #[serde(default)]
    pub deadband: u32,
    #[serde(default)]
    pub min_pos: i32,
    #[serde(default)]
    pub max_pos: i32,
    #[serde(default)]
    pub accel: u32,
    #[serde(default)]
    pub feedback_sensor: Option<usize>,
    /// Bound on the magnitude of the PI integral accumulator
    #[serde(default = "default_saturation")]
    pub saturation: f32,
    /// Largest change of written duty per cycle, 0 disables ramping
    #[serde(default)]
    pub max_delta: u16,
    #[serde(default = "default_max_duty")]
    pub max_duty: u16,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub board: Option<usize>,

    #[serde(skip)]
    pub set_pt: i16,
    #[serde(skip)]
    pub last_set: i16,
    #[serde(skip)]
    pub integral: f32,
    #[serde(skip)]
    pub last_update_time: u32,
}

impl MotorRecord {
    pub fn is_bus_duty(&self) -> bool {
        self.kind == MotorKind::SerialDuty
    }

    pub fn is_closed_loop(&self) -> bool {
        self.kind == MotorKind::BrushedPosition
    }
}

/// Motor controller board shared by one or more motor records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Board {
    /// Two motors behind one relay driver, addressed through a select line
    RelayPair { select_pin: u8 },
    SerialDuty { addr: u8 },
    /// Index into `Hardware::param_buses`
    Brushless { bus: usize },
}

fn default_responsiveness() -> f32 {
    1.0
}

fn default_scale() -> u16 {
    1
}

fn default_saturation() -> f32 {
    1000.0
}

fn default_max_duty() -> u16 {
    i16::MAX as u16
}

/// Process-lifetime registry of every sensor, motor and board
#[derive(Debug)]
pub struct Registry {
    sensors: Vec<SensorRecord>,
    motors: Vec<MotorRecord>,
    boards: Vec<Board>,
    linked_pair: Option<[usize; 2]>,
    limit_switches: Vec<usize>,
}

impl Registry {
    /// Callers are expected to have validated the cross references
    pub(crate) fn new(
        sensors: Vec<SensorRecord>,
        motors: Vec<MotorRecord>,
        boards: Vec<Board>,
        linked_pair: Option<[usize; 2]>,
    ) -> Self {
        let limit_switches = sensors
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == SensorKind::LimitPin)
            .map(|(id, _)| id)
            .collect();

        Self {
            sensors,
            motors,
            boards,
            linked_pair,
            limit_switches,
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn motor_count(&self) -> usize {
        self.motors.len()
    }

    /// # Panics
    /// If `id` is out of range, which is a configuration bug
    pub fn sensor(&self, id: usize) -> &SensorRecord {
        &self.sensors[id]
    }

    pub fn sensor_mut(&mut self, id: usize) -> &mut SensorRecord {
        &mut self.sensors[id]
    }

    /// # Panics
    /// If `id` is out of range, which is a configuration bug
    pub fn motor(&self, id: usize) -> &MotorRecord {
        &self.motors[id]
    }

    pub fn motor_mut(&mut self, id: usize) -> &mut MotorRecord {
        &mut self.motors[id]
    }

    pub fn motors_mut(&mut self) -> impl Iterator<Item = &mut MotorRecord> {
        self.motors.iter_mut()
    }

    pub fn board(&self, id: usize) -> Option<Board> {
        self.boards.get(id).copied()
    }

    /// Board handle of a motor, if it has one
    pub fn board_of(&self, motor: usize) -> Option<Board> {
        self.motors[motor].board.and_then(|b| self.board(b))
    }

    pub fn linked_pair(&self) -> Option<[usize; 2]> {
        self.linked_pair
    }

    pub fn is_linked(&self, motor: usize) -> bool {
        self.linked_pair.is_some_and(|pair| pair.contains(&motor))
    }

    /// Ids of every limit-pin sensor, in registry order
    pub fn limit_switches(&self) -> &[usize] {
        &self.limit_switches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pot(responsiveness: f32) -> SensorRecord {
        serde_json::from_value(serde_json::json!({
            "kind": "analog_pot_pin",
            "responsiveness": responsiveness,
        }))
        .unwrap()
    }

    #[test]
    fn test_smoothing_unfiltered() {
        let mut s = pot(1.0);
        s.stored_val = 42.0;
        assert_eq!(s.smooth(300.0, 7), 300.0);
        assert_eq!(s.last_update_time, 7);
    }

    #[test]
    fn test_smoothing_frozen() {
        let mut s = pot(0.0);
        s.stored_val = 42.0;
        for _ in 0..5 {
            assert_eq!(s.smooth(300.0, 1), 42.0);
        }
    }

    #[test]
    fn test_smoothing_weighted() {
        let mut s = pot(0.25);
        s.stored_val = 100.0;
        // 100 * 0.75 + 200 * 0.25
        assert_eq!(s.smooth(200.0, 1), 125.0);
    }

    #[test]
    fn test_record_defaults() {
        let s = pot(1.0);
        assert_eq!(s.scale, 1);
        assert_eq!(s.which_motor, None);

        let m: MotorRecord =
            serde_json::from_value(serde_json::json!({ "kind": "serial_duty" })).unwrap();
        assert!(m.is_bus_duty());
        assert_eq!(m.max_duty, 32767);
        assert_eq!(m.max_delta, 0);
        assert_eq!(m.set_pt, 0);
        assert_eq!(m.last_set, 0);
    }

    #[test]
    fn test_board_tagging() {
        let b: Board =
            serde_json::from_value(serde_json::json!({ "kind": "relay_pair", "select_pin": 22 }))
                .unwrap();
        assert_eq!(b, Board::RelayPair { select_pin: 22 });
    }

    #[test]
    fn test_limit_switch_index() {
        let mut limit = pot(1.0);
        limit.kind = SensorKind::LimitPin;
        let reg = Registry::new(vec![pot(1.0), limit.clone(), limit], vec![], vec![], None);
        assert_eq!(reg.limit_switches(), &[1, 2]);
    }
}
