// Command dispatch
//
// Set-outputs only stages set-points into the registry; the maintenance
// cycle decides when they reach hardware. Read-sensors and diagnostic test
// commands are answered with a reply frame.

use tracing::{debug, warn};

use crate::hal::Hardware;
use crate::messages::{self, CommandType};
use crate::registry::Registry;
use crate::sensor::read_sensor;

/// True for a structurally valid set-outputs command
pub fn is_set_outputs(cmd: &[u8], valid: bool) -> bool {
    valid && messages::cmd_type(cmd) == Some(CommandType::SetOutputs as u8)
}

/// Stage every (motor, set-point) record of a set-outputs command
///
/// Returns the ids of the motors that were staged, in command order. Anything
/// other than a valid set-outputs command is ignored.
pub fn stage_outputs(registry: &mut Registry, cmd: &[u8], valid: bool) -> Vec<usize> {
    if !is_set_outputs(cmd, valid) {
        return Vec::new();
    }

    let mut staged = Vec::new();
    for point in messages::set_points(messages::cmd_body(cmd)) {
        let id = usize::from(point.motor);
        if id >= registry.motor_count() {
            warn!("Set-outputs names unknown motor {}", id);
            continue;
        }
        debug!("Staging motor {} set-point {}", id, point.value);
        registry.motor_mut(id).set_pt = point.value;
        staged.push(id);
    }
    staged
}

/// Build the reply frame for commands that expect one
pub fn respond(registry: &mut Registry, hw: &mut Hardware, cmd: &[u8], valid: bool) -> Option<Vec<u8>> {
    if !valid {
        return None;
    }
    let kind = CommandType::try_from(messages::cmd_type(cmd)?).ok()?;

    match kind {
        CommandType::ReadSensors => {
            let mut readings = Vec::new();
            for &id in messages::cmd_body(cmd) {
                if usize::from(id) >= registry.sensor_count() {
                    warn!("Read-sensors names unknown sensor {}", id);
                    continue;
                }
                let reading = read_sensor(registry, hw, usize::from(id));
                let value = reading.value.clamp(i16::MIN.into(), i16::MAX.into()) as i16;
                readings.push((id, value));
            }
            Some(messages::sensor_reply(&readings))
        }
        CommandType::HciTest => Some(messages::test_reply()),
        CommandType::SetOutputs => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotConfig;
    use crate::sim::Sim;
    use serde_json::json;

    fn setup() -> (Registry, Hardware, Sim) {
        let config: RobotConfig = serde_json::from_value(json!({
            "boards": [{ "kind": "serial_duty", "addr": 128 }],
            "motors": [
                { "kind": "serial_duty", "board": 0 },
                { "kind": "serial_duty", "board": 0, "channel": 1 },
                { "kind": "serial_duty", "board": 0 },
            ],
            "sensors": [
                { "kind": "analog_pot_pin", "pin": 54 },
                { "kind": "load_cell", "pin": 24 },
            ],
        }))
        .unwrap();
        let sim = Sim::new();
        (config.into_registry().unwrap(), sim.hardware(0), sim)
    }

    #[test]
    fn test_stage_set_outputs() {
        let (mut reg, _hw, sim) = setup();
        let staged = stage_outputs(&mut reg, &[0x02, 0x03, 2, 0x01, 0x2C], true);

        assert_eq!(staged, vec![2]);
        assert_eq!(reg.motor(2).set_pt, 300);
        assert_eq!(reg.motor(2).last_set, 0);
        // Staging never touches hardware
        assert!(sim.events().is_empty());
    }

    #[test]
    fn test_invalid_or_other_commands_ignored() {
        let (mut reg, _hw, _sim) = setup();
        assert!(stage_outputs(&mut reg, &[0x02, 0x03, 2, 0x01, 0x2C], false).is_empty());
        assert!(stage_outputs(&mut reg, &[0x01, 0x03, 2, 0x01, 0x2C], true).is_empty());
        assert!(stage_outputs(&mut reg, &[0x44, 0x03, 2, 0x01, 0x2C], true).is_empty());
        assert_eq!(reg.motor(2).set_pt, 0);
    }

    #[test]
    fn test_unknown_motor_skipped() {
        let (mut reg, _hw, _sim) = setup();
        let staged = stage_outputs(&mut reg, &[0x02, 0x06, 9, 0x00, 0x01, 1, 0xFF, 0xFF], true);
        assert_eq!(staged, vec![1]);
        assert_eq!(reg.motor(1).set_pt, -1);
    }

    #[test]
    fn test_read_sensors_reply() {
        let (mut reg, mut hw, sim) = setup();
        sim.set_analog(54, 700);
        sim.state().shift_in.extend([0x01, 0x00, 0x00]);

        let reply = respond(&mut reg, &mut hw, &[0x01, 0x03, 0, 1, 42], true).unwrap();
        // Load cell reads 65536, saturated to i16; sensor 42 is unknown
        assert_eq!(reply, vec![0x01, 6, 0, 0x02, 0xBC, 1, 0x7F, 0xFF]);
    }

    #[test]
    fn test_diagnostic_reply() {
        let (mut reg, mut hw, _sim) = setup();
        assert_eq!(
            respond(&mut reg, &mut hw, &[0x03, 0x00], true),
            Some(vec![0xA5, 0x00])
        );
        assert_eq!(respond(&mut reg, &mut hw, &[0x03, 0x00], false), None);
        assert_eq!(respond(&mut reg, &mut hw, &[0x02, 0x00], true), None);
    }
}
