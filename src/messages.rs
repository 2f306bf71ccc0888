// Host command envelope
//
// Frame: [type: 1 byte][body length: 1 byte][body...]
// A set-outputs body repeats [motor id][set-point hi][set-point lo].

use serde::Serialize;

use crate::config::{CMD_HEADER_SIZE, INSTRUCTION_LEN};

pub const CMD_READ_SENSORS: u8 = 0x01;
pub const CMD_SET_OUTPUTS: u8 = 0x02;
pub const CMD_HCI_TEST: u8 = 0x03;
pub const RPY_HCI_TEST: u8 = 0xA5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    ReadSensors = CMD_READ_SENSORS,
    SetOutputs = CMD_SET_OUTPUTS,
    HciTest = CMD_HCI_TEST,
}

impl TryFrom<u8> for CommandType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            CMD_READ_SENSORS => Ok(Self::ReadSensors),
            CMD_SET_OUTPUTS => Ok(Self::SetOutputs),
            CMD_HCI_TEST => Ok(Self::HciTest),
            other => Err(other),
        }
    }
}

/// Fault codes reported by the command link
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    None = 1,
    FailedWrite = 2,
    IncompleteHeader = 3,
    CorruptedHeader = 4,
    IncompleteBody = 5,
    CorruptedBody = 6,
    LogFull = 7,
}

impl Fault {
    pub fn is_ok(self) -> bool {
        self == Fault::None
    }
}

/// Raw type byte of a command, if it has one
pub fn cmd_type(cmd: &[u8]) -> Option<u8> {
    cmd.first().copied()
}

/// Declared body length of a command
pub fn cmd_body_len(cmd: &[u8]) -> usize {
    cmd.get(1).map_or(0, |&len| usize::from(len))
}

/// Body bytes, bounded by both the declared length and the buffer
pub fn cmd_body(cmd: &[u8]) -> &[u8] {
    let body = cmd.get(CMD_HEADER_SIZE..).unwrap_or(&[]);
    &body[..cmd_body_len(cmd).min(body.len())]
}

/// One (motor, set-point) instruction of a set-outputs body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPoint {
    pub motor: u8,
    pub value: i16,
}

/// Decode set-point records; a trailing partial record is dropped
pub fn set_points(body: &[u8]) -> impl Iterator<Item = SetPoint> + '_ {
    body.chunks_exact(INSTRUCTION_LEN).map(|rec| SetPoint {
        motor: rec[0],
        value: i16::from_be_bytes([rec[1], rec[2]]),
    })
}

/// Reply to a read-sensors command: [0x01, len, (id, hi, lo)*]
pub fn sensor_reply(readings: &[(u8, i16)]) -> Vec<u8> {
    let mut reply = vec![CMD_READ_SENSORS, 0];
    for &(id, value) in readings.iter().take(usize::from(u8::MAX) / INSTRUCTION_LEN) {
        reply.push(id);
        reply.extend_from_slice(&value.to_be_bytes());
    }
    reply[1] = (reply.len() - CMD_HEADER_SIZE) as u8;
    reply
}

/// Reply to a diagnostic test command
pub fn test_reply() -> Vec<u8> {
    vec![RPY_HCI_TEST, 0]
}

/// Health status of the runtime loop
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

/// Status logged by the runtime whenever it changes
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Status {
    pub health: RuntimeHealth,
    /// Outcome of the last reply write
    pub link: Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_codes() {
        assert_eq!(CommandType::try_from(0x02), Ok(CommandType::SetOutputs));
        assert_eq!(CommandType::try_from(0x03), Ok(CommandType::HciTest));
        assert_eq!(CommandType::try_from(0x7F), Err(0x7F));
        assert_eq!(Fault::CorruptedBody as u8, 6);
    }

    #[test]
    fn test_set_points_big_endian() {
        let cmd = [0x02, 0x06, 2, 0x01, 0x2C, 5, 0xFF, 0x38];
        let points: Vec<_> = set_points(cmd_body(&cmd)).collect();
        assert_eq!(
            points,
            vec![
                SetPoint {
                    motor: 2,
                    value: 300
                },
                SetPoint {
                    motor: 5,
                    value: -200
                },
            ]
        );
    }

    #[test]
    fn test_body_bounded_by_buffer() {
        // Declares 9 bytes, carries 4
        let cmd = [0x02, 0x09, 1, 0x00, 0x10, 7];
        assert_eq!(cmd_body(&cmd), &[1, 0x00, 0x10, 7]);
        assert_eq!(set_points(cmd_body(&cmd)).count(), 1);
        assert!(cmd_body(&[0x02]).is_empty());
        assert_eq!(cmd_type(&[]), None);
    }

    #[test]
    fn test_status_json() {
        let status = Status {
            health: RuntimeHealth::CmdStale,
            link: Fault::FailedWrite,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"health":"cmd_stale","link":"failed_write"}"#
        );
    }

    #[test]
    fn test_replies() {
        assert_eq!(
            sensor_reply(&[(3, -2), (9, 0x0102)]),
            vec![0x01, 6, 3, 0xFF, 0xFE, 9, 0x01, 0x02]
        );
        assert_eq!(test_reply(), vec![0xA5, 0x00]);
    }
}
