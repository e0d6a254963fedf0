use thiserror::Error;

use crate::Command;

/// Size of a control packet on the wire.
pub const PACKET_LEN: usize = 6;

/// The only packet kind in use: a command with a 32-bit payload.
pub const PACKET_KIND_CONTROL: u8 = 1;

/// Raw control packet before command-specific interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub kind: u8,
    pub command: u8,
    pub data: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet must be {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("invalid payload 0x{data:08x} for {command:?}")]
    InvalidPayload { command: Command, data: u32 },
}

impl Packet {
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let d = self.data.to_le_bytes();
        [self.kind, self.command, d[0], d[1], d[2], d[3]]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: [u8; PACKET_LEN] = bytes.try_into().map_err(|_| DecodeError::Length {
            expected: PACKET_LEN,
            got: bytes.len(),
        })?;
        Ok(Self {
            kind: raw[0],
            command: raw[1],
            data: u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]),
        })
    }
}
