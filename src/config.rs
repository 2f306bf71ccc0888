// Loop timing, wire sizes, and the robot wiring file
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::registry::{Board, MotorKind, MotorRecord, Registry, SensorKind, SensorRecord};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command watchdog, stage zero outputs if no set-outputs arrives within this
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Host command link
pub const HCI_BAUD: u32 = 9600;
pub const DEFAULT_BUF_LEN: usize = 256;
pub const CMD_HEADER_SIZE: usize = 2;
pub const INSTRUCTION_LEN: usize = 3;

// Relay driver select-line protocol
pub const SELECT_SETTLE_US: u32 = 50;
pub const RELAY_POWER_LIMIT: i32 = 127;

/// Errors raised while loading the wiring file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Sensor {id}: {reason}")]
    InvalidSensor { id: usize, reason: String },

    #[error("Motor {id}: {reason}")]
    InvalidMotor { id: usize, reason: String },

    #[error("Linked pair {pair:?}: {reason}")]
    InvalidLinkedPair { pair: [usize; 2], reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Wiring of every sensor, motor and board, as read from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct RobotConfig {
    #[serde(default)]
    pub sensors: Vec<SensorRecord>,
    #[serde(default)]
    pub motors: Vec<MotorRecord>,
    #[serde(default)]
    pub boards: Vec<Board>,
    /// Two actuators that are always driven together
    #[serde(default)]
    pub linked_pair: Option<[usize; 2]>,
}

impl RobotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading robot config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate cross references and build the registry
    pub fn into_registry(self) -> Result<Registry> {
        self.validate()?;
        info!(
            "Registry: {} sensors, {} motors, {} boards",
            self.sensors.len(),
            self.motors.len(),
            self.boards.len()
        );
        Ok(Registry::new(
            self.sensors,
            self.motors,
            self.boards,
            self.linked_pair,
        ))
    }

    /// Number of brushless parameter buses the boards refer to
    pub fn param_bus_count(&self) -> usize {
        self.boards
            .iter()
            .filter_map(|b| match b {
                Board::Brushless { bus } => Some(bus + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn validate(&self) -> Result<()> {
        for (id, sensor) in self.sensors.iter().enumerate() {
            self.validate_sensor(id, sensor)?;
        }
        for (id, motor) in self.motors.iter().enumerate() {
            self.validate_motor(id, motor)?;
        }
        if let Some(pair) = self.linked_pair {
            let invalid = |reason: &str| ConfigError::InvalidLinkedPair {
                pair,
                reason: reason.to_string(),
            };
            if pair[0] == pair[1] {
                return Err(invalid("both ends are the same motor"));
            }
            if pair.iter().any(|&m| m >= self.motors.len()) {
                return Err(invalid("unknown motor"));
            }
        }
        Ok(())
    }

    fn validate_sensor(&self, id: usize, sensor: &SensorRecord) -> Result<()> {
        let invalid = |reason: String| ConfigError::InvalidSensor { id, reason };

        if sensor.scale == 0 {
            return Err(invalid("scale must not be 0".into()));
        }
        if !(0.0..=1.0).contains(&sensor.responsiveness) {
            return Err(invalid(format!(
                "responsiveness {} outside [0, 1]",
                sensor.responsiveness
            )));
        }
        if let Some(m) = sensor.which_motor {
            if m >= self.motors.len() {
                return Err(invalid(format!("unknown motor {m}")));
            }
        }

        let needs_motor = matches!(
            sensor.kind,
            SensorKind::LimitPin
                | SensorKind::BrushlessPot
                | SensorKind::BrushlessEncoder
                | SensorKind::BrushlessCurrent
                | SensorKind::BrushedPot
                | SensorKind::BrushedEncoder
        );
        if needs_motor && sensor.which_motor.is_none() {
            return Err(invalid(format!("{:?} needs which_motor", sensor.kind)));
        }
        if sensor.kind == SensorKind::LimitPin && !matches!(sensor.trip_direction, 1 | -1) {
            return Err(invalid(format!(
                "trip_direction must be 1 or -1, got {}",
                sensor.trip_direction
            )));
        }
        Ok(())
    }

    fn validate_motor(&self, id: usize, motor: &MotorRecord) -> Result<()> {
        let invalid = |reason: String| ConfigError::InvalidMotor { id, reason };

        if motor.scale == 0 {
            return Err(invalid("scale must not be 0".into()));
        }
        if motor.saturation < 0.0 {
            return Err(invalid("saturation must not be negative".into()));
        }
        if let Some(s) = motor.feedback_sensor {
            if s >= self.sensors.len() {
                return Err(invalid(format!("unknown feedback sensor {s}")));
            }
        }
        if motor.kind == MotorKind::BrushedPosition && motor.feedback_sensor.is_none() {
            return Err(invalid("position control needs a feedback sensor".into()));
        }

        let board = match motor.board {
            Some(b) => Some(
                *self
                    .boards
                    .get(b)
                    .ok_or_else(|| invalid(format!("unknown board {b}")))?,
            ),
            None => None,
        };

        let board_fits = match motor.kind {
            MotorKind::SerialDuty => matches!(board, Some(Board::SerialDuty { .. })),
            MotorKind::BrushedPwm | MotorKind::BrushedPosition | MotorKind::BrushedPwmBoth => {
                matches!(board, Some(Board::RelayPair { .. }))
            }
            MotorKind::BrushlessVelocity | MotorKind::BrushlessPosition => {
                matches!(board, Some(Board::Brushless { .. }))
            }
            _ => true,
        };
        if !board_fits {
            return Err(invalid(format!(
                "{:?} cannot run on board {:?}",
                motor.kind, board
            )));
        }
        Ok(())
    }
}
