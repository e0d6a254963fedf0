//! Wire protocol shared by the bottle and the gateway.
//!
//! Every message travels as a fixed 6-byte control packet:
//!
//! ```text
//! +------+---------+----------------------+
//! | kind | command | data (u32, LE)       |
//! +------+---------+----------------------+
//!   1 B     1 B        4 B
//! ```
//!
//! Numeric payloads are carried as IEEE-754 `f32` bits, booleans as `1.0` /
//! `0.0`, and wall-clock time as a raw epoch `u32`.  Packets ride on MQTT
//! topics `link/<device_id>/up` (bottle → gateway) and
//! `link/<device_id>/down` (gateway → bottle); see [`topic`].

pub mod packet;
pub mod topic;

use serde::{Deserialize, Serialize};

pub use packet::{DecodeError, Packet, PACKET_KIND_CONTROL, PACKET_LEN};

// ---------------------------------------------------------------------------
// Command codes
// ---------------------------------------------------------------------------

/// One-byte command identifiers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    SetLed = 0x10,
    SetBuzzer = 0x11,
    SetRgb = 0x12,
    GetWeight = 0x20,
    ReportWeight = 0x21,
    Tare = 0x22,
    RequestDailyTotal = 0x23,
    RequestTime = 0x30,
    ReportTime = 0x31,
    RequestPresence = 0x40,
    ReportPresence = 0x41,
    AlertMissing = 0x50,
    AlertReplaced = 0x51,
    AlertReminderStarted = 0x52,
    AlertStopped = 0x53,
    DrinkDetected = 0x60,
    DailyTotal = 0x61,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x10 => Self::SetLed,
            0x11 => Self::SetBuzzer,
            0x12 => Self::SetRgb,
            0x20 => Self::GetWeight,
            0x21 => Self::ReportWeight,
            0x22 => Self::Tare,
            0x23 => Self::RequestDailyTotal,
            0x30 => Self::RequestTime,
            0x31 => Self::ReportTime,
            0x40 => Self::RequestPresence,
            0x41 => Self::ReportPresence,
            0x50 => Self::AlertMissing,
            0x51 => Self::AlertReplaced,
            0x52 => Self::AlertReminderStarted,
            0x53 => Self::AlertStopped,
            0x60 => Self::DrinkDetected,
            0x61 => Self::DailyTotal,
            other => return Err(DecodeError::UnknownCommand(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// Typed messages
// ---------------------------------------------------------------------------

/// A decoded link message with its payload.
///
/// The same set is used in both directions; which side sends what is a
/// convention of the two binaries, not of the codec.  The serde form
/// (`{"command": "set_led", "value": true}`) is what the gateway's HTTP API
/// accepts for diagnostic commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum Message {
    SetLed(bool),
    SetBuzzer(bool),
    /// Palette index understood by the bottle's RGB driver.
    SetRgb(u8),
    GetWeight,
    ReportWeight(f32),
    Tare,
    RequestDailyTotal,
    RequestTime,
    /// Unix epoch seconds.
    ReportTime(u32),
    RequestPresence,
    ReportPresence(bool),
    AlertMissing,
    AlertReplaced,
    AlertReminderStarted,
    AlertStopped,
    DrinkDetected(f32),
    DailyTotal(f32),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Self::SetLed(_) => Command::SetLed,
            Self::SetBuzzer(_) => Command::SetBuzzer,
            Self::SetRgb(_) => Command::SetRgb,
            Self::GetWeight => Command::GetWeight,
            Self::ReportWeight(_) => Command::ReportWeight,
            Self::Tare => Command::Tare,
            Self::RequestDailyTotal => Command::RequestDailyTotal,
            Self::RequestTime => Command::RequestTime,
            Self::ReportTime(_) => Command::ReportTime,
            Self::RequestPresence => Command::RequestPresence,
            Self::ReportPresence(_) => Command::ReportPresence,
            Self::AlertMissing => Command::AlertMissing,
            Self::AlertReplaced => Command::AlertReplaced,
            Self::AlertReminderStarted => Command::AlertReminderStarted,
            Self::AlertStopped => Command::AlertStopped,
            Self::DrinkDetected(_) => Command::DrinkDetected,
            Self::DailyTotal(_) => Command::DailyTotal,
        }
    }

    /// Commands an operator may push to a bottle from the gateway for
    /// diagnostics or maintenance.
    pub fn is_device_command(&self) -> bool {
        matches!(
            self,
            Self::SetLed(_)
                | Self::SetBuzzer(_)
                | Self::SetRgb(_)
                | Self::GetWeight
                | Self::Tare
                | Self::RequestDailyTotal
        )
    }

    pub fn to_packet(&self) -> Packet {
        let data = match *self {
            Self::SetLed(on) | Self::SetBuzzer(on) | Self::ReportPresence(on) => bool_bits(on),
            Self::SetRgb(code) => f32::from(code).to_bits(),
            Self::ReportWeight(v) | Self::DrinkDetected(v) | Self::DailyTotal(v) => v.to_bits(),
            Self::ReportTime(epoch) => epoch,
            Self::GetWeight
            | Self::Tare
            | Self::RequestDailyTotal
            | Self::RequestTime
            | Self::RequestPresence
            | Self::AlertMissing
            | Self::AlertReplaced
            | Self::AlertReminderStarted
            | Self::AlertStopped => 0,
        };
        Packet {
            kind: PACKET_KIND_CONTROL,
            command: self.command().code(),
            data,
        }
    }

    pub fn from_packet(packet: Packet) -> Result<Self, DecodeError> {
        if packet.kind != PACKET_KIND_CONTROL {
            return Err(DecodeError::UnknownKind(packet.kind));
        }
        let command = Command::try_from(packet.command)?;
        let data = packet.data;
        Ok(match command {
            Command::SetLed => Self::SetLed(bits_bool(data)),
            Command::SetBuzzer => Self::SetBuzzer(bits_bool(data)),
            Command::SetRgb => Self::SetRgb(color_code(data)?),
            Command::GetWeight => Self::GetWeight,
            Command::ReportWeight => Self::ReportWeight(finite(command, data)?),
            Command::Tare => Self::Tare,
            Command::RequestDailyTotal => Self::RequestDailyTotal,
            Command::RequestTime => Self::RequestTime,
            Command::ReportTime => Self::ReportTime(data),
            Command::RequestPresence => Self::RequestPresence,
            Command::ReportPresence => Self::ReportPresence(bits_bool(data)),
            Command::AlertMissing => Self::AlertMissing,
            Command::AlertReplaced => Self::AlertReplaced,
            Command::AlertReminderStarted => Self::AlertReminderStarted,
            Command::AlertStopped => Self::AlertStopped,
            Command::DrinkDetected => Self::DrinkDetected(finite(command, data)?),
            Command::DailyTotal => Self::DailyTotal(finite(command, data)?),
        })
    }

    /// Encode straight to the 6-byte wire form.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        self.to_packet().to_bytes()
    }

    /// Decode from a raw payload (must be exactly [`PACKET_LEN`] bytes).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_packet(Packet::from_bytes(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn bool_bits(on: bool) -> u32 {
    let v: f32 = if on { 1.0 } else { 0.0 };
    v.to_bits()
}

/// Any non-zero, non-NaN payload is "true".  This also accepts the raw
/// integer 1 some older senders put on the wire.
fn bits_bool(data: u32) -> bool {
    let v = f32::from_bits(data);
    !v.is_nan() && v != 0.0
}

fn finite(command: Command, data: u32) -> Result<f32, DecodeError> {
    let v = f32::from_bits(data);
    if v.is_finite() {
        Ok(v)
    } else {
        Err(DecodeError::InvalidPayload { command, data })
    }
}

fn color_code(data: u32) -> Result<u8, DecodeError> {
    let v = f32::from_bits(data);
    if v.is_finite() && v.fract() == 0.0 && (0.0..=255.0).contains(&v) {
        Ok(v as u8)
    } else {
        Err(DecodeError::InvalidPayload {
            command: Command::SetRgb,
            data,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
