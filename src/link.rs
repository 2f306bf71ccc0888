// Serial command link to the host
//
// Frames are [type][body length][body...] with no sync byte or checksum, so
// framing faults are detected from the header and the body length only.

use serialport::{self, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{CMD_HEADER_SIZE, DEFAULT_BUF_LEN, INSTRUCTION_LEN};
use crate::messages::{self, CommandType, Fault};

/// Read timeout; an idle link just yields no frame
pub const LINK_TIMEOUT_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// A received command together with its framing verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub fault: Fault,
}

impl Frame {
    pub fn is_valid(&self) -> bool {
        self.fault.is_ok()
    }
}

/// Structural check of a complete command buffer
pub fn validate(cmd: &[u8]) -> Fault {
    if cmd.len() < CMD_HEADER_SIZE {
        return Fault::IncompleteHeader;
    }
    let Some(kind) = messages::cmd_type(cmd).and_then(|t| CommandType::try_from(t).ok()) else {
        return Fault::CorruptedHeader;
    };

    let body_len = messages::cmd_body_len(cmd);
    if cmd.len() - CMD_HEADER_SIZE < body_len {
        return Fault::IncompleteBody;
    }
    if kind == CommandType::SetOutputs && body_len % INSTRUCTION_LEN != 0 {
        return Fault::CorruptedBody;
    }
    Fault::None
}

pub fn open_port(port_name: &str, baudrate: u32) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(port_name, baudrate)
        .timeout(Duration::from_millis(LINK_TIMEOUT_MS))
        .open()?;
    Ok(port)
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Pulls command frames off a byte stream
pub struct FrameReader<R> {
    port: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(port: R) -> Self {
        Self { port }
    }

    /// Read one frame, `None` when the link is idle
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut kind = [0u8; 1];
        match self.port.read(&mut kind) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(LinkError::Io(e)),
        }

        let mut bytes = Vec::with_capacity(DEFAULT_BUF_LEN);
        bytes.push(kind[0]);
        let mut len = [0u8; 1];
        match self.port.read_exact(&mut len) {
            Ok(()) => bytes.push(len[0]),
            Err(e) if is_timeout(&e) || e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Some(faulted(bytes, Fault::IncompleteHeader)));
            }
            Err(e) => return Err(LinkError::Io(e)),
        }

        let mut body = vec![0u8; usize::from(len[0])];
        match self.port.read_exact(&mut body) {
            Ok(()) => bytes.extend_from_slice(&body),
            Err(e) if is_timeout(&e) || e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Some(faulted(bytes, Fault::IncompleteBody)));
            }
            Err(e) => return Err(LinkError::Io(e)),
        }

        let fault = validate(&bytes);
        if !fault.is_ok() {
            return Ok(Some(faulted(bytes, fault)));
        }
        debug!("Received frame: {:02X?}", bytes);
        Ok(Some(Frame { bytes, fault }))
    }
}

fn faulted(bytes: Vec<u8>, fault: Fault) -> Frame {
    warn!("Framing fault {:?} on {:02X?}", fault, bytes);
    Frame { bytes, fault }
}

/// Send a reply frame, reporting a failed write as a fault
pub fn write_reply<W: Write>(port: &mut W, reply: &[u8]) -> Fault {
    match port.write_all(reply).and_then(|()| port.flush()) {
        Ok(()) => {
            debug!("Sent reply: {:02X?}", reply);
            Fault::None
        }
        Err(e) => {
            warn!("Failed to send reply: {}", e);
            Fault::FailedWrite
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(stream: &[u8]) -> Vec<Frame> {
        let mut reader = FrameReader::new(Cursor::new(stream.to_vec()));
        let mut frames = vec![];
        while let Some(frame) = reader.read_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_validate() {
        assert_eq!(validate(&[0x02, 0x03, 2, 0x01, 0x2C]), Fault::None);
        assert_eq!(validate(&[0x02]), Fault::IncompleteHeader);
        assert_eq!(validate(&[0x09, 0x00]), Fault::CorruptedHeader);
        assert_eq!(validate(&[0x02, 0x03, 2, 0x01]), Fault::IncompleteBody);
        assert_eq!(validate(&[0x02, 0x02, 2, 0x01]), Fault::CorruptedBody);
        // Read-sensors bodies are plain id lists
        assert_eq!(validate(&[0x01, 0x02, 4, 5]), Fault::None);
    }

    #[test]
    fn test_reads_back_to_back_frames() {
        let frames = read_all(&[0x03, 0x00, 0x02, 0x03, 2, 0x01, 0x2C]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes, vec![0x03, 0x00]);
        assert!(frames[1].is_valid());
        assert_eq!(frames[1].bytes, vec![0x02, 0x03, 2, 0x01, 0x2C]);
    }

    #[test]
    fn test_truncated_frames() {
        let frames = read_all(&[0x02, 0x03, 2]);
        assert_eq!(frames[0].fault, Fault::IncompleteBody);

        let frames = read_all(&[0x02]);
        assert_eq!(frames[0].fault, Fault::IncompleteHeader);
    }

    #[test]
    fn test_corrupt_type() {
        let frames = read_all(&[0x7E, 0x00]);
        assert_eq!(
            frames,
            vec![Frame {
                bytes: vec![0x7E, 0x00],
                fault: Fault::CorruptedHeader
            }]
        );
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_reply() {
        let mut out = Vec::new();
        assert_eq!(write_reply(&mut out, &[0xA5, 0x00]), Fault::None);
        assert_eq!(out, vec![0xA5, 0x00]);
        assert_eq!(write_reply(&mut Broken, &[0xA5, 0x00]), Fault::FailedWrite);
    }
}
