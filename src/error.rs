//! # Reader Error Handling
//!
//! This module defines the ReaderError enum, which represents the different
//! error types that can occur in the m6e-rs crate, and the StatusCode newtype
//! wrapping the 16-bit status word the module returns in every response.

use thiserror::Error;

/// A 16-bit status word returned by the module in a response frame.
///
/// Zero means success and is never wrapped in an error. The known non-zero
/// values are grouped by subsystem, matching the module firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const MSG_WRONG_NUMBER_OF_DATA: StatusCode = StatusCode(0x0100);
    pub const INVALID_OPCODE: StatusCode = StatusCode(0x0101);
    pub const UNIMPLEMENTED_OPCODE: StatusCode = StatusCode(0x0102);
    pub const MSG_POWER_TOO_HIGH: StatusCode = StatusCode(0x0103);
    pub const MSG_INVALID_FREQ_RECEIVED: StatusCode = StatusCode(0x0104);
    pub const MSG_INVALID_PARAMETER_VALUE: StatusCode = StatusCode(0x0105);
    pub const MSG_POWER_TOO_LOW: StatusCode = StatusCode(0x0106);
    pub const UNIMPLEMENTED_FEATURE: StatusCode = StatusCode(0x0109);
    pub const INVALID_BAUD_RATE: StatusCode = StatusCode(0x010A);
    pub const INVALID_REGION: StatusCode = StatusCode(0x010B);

    pub const NO_TAGS_FOUND: StatusCode = StatusCode(0x0400);
    pub const NO_PROTOCOL_DEFINED: StatusCode = StatusCode(0x0401);
    pub const INVALID_PROTOCOL_SPECIFIED: StatusCode = StatusCode(0x0402);
    pub const WRITE_PASSED_LOCK_FAILED: StatusCode = StatusCode(0x0403);
    pub const PROTOCOL_NO_DATA_READ: StatusCode = StatusCode(0x0404);
    pub const AFE_NOT_ON: StatusCode = StatusCode(0x0405);
    pub const PROTOCOL_WRITE_FAILED: StatusCode = StatusCode(0x0406);
    pub const NOT_IMPLEMENTED_FOR_THIS_PROTOCOL: StatusCode = StatusCode(0x0407);
    pub const PROTOCOL_INVALID_WRITE_DATA: StatusCode = StatusCode(0x0408);
    pub const PROTOCOL_INVALID_ADDRESS: StatusCode = StatusCode(0x0409);
    pub const GENERAL_TAG_ERROR: StatusCode = StatusCode(0x040A);
    pub const DATA_TOO_LARGE: StatusCode = StatusCode(0x040B);
    pub const PROTOCOL_INVALID_KILL_PASSWORD: StatusCode = StatusCode(0x040C);
    pub const PROTOCOL_KILL_FAILED: StatusCode = StatusCode(0x040E);
    pub const PROTOCOL_BIT_DECODING_FAILED: StatusCode = StatusCode(0x040F);
    pub const PROTOCOL_INVALID_EPC: StatusCode = StatusCode(0x0410);
    pub const PROTOCOL_INVALID_NUM_DATA: StatusCode = StatusCode(0x0411);

    pub const GEN2_PROTOCOL_OTHER_ERROR: StatusCode = StatusCode(0x0420);
    pub const GEN2_PROTOCOL_MEMORY_OVERRUN_BAD_PC: StatusCode = StatusCode(0x0423);
    pub const GEN2_PROTOCOL_MEMORY_LOCKED: StatusCode = StatusCode(0x0424);
    pub const GEN2_PROTOCOL_INSUFFICIENT_POWER: StatusCode = StatusCode(0x042B);
    pub const GEN2_PROTOCOL_NON_SPECIFIC_ERROR: StatusCode = StatusCode(0x042F);
    pub const GEN2_PROTOCOL_UNKNOWN_ERROR: StatusCode = StatusCode(0x0430);

    pub const AHAL_INVALID_FREQ: StatusCode = StatusCode(0x0500);
    pub const AHAL_CHANNEL_OCCUPIED: StatusCode = StatusCode(0x0501);
    pub const AHAL_TRANSMITTER_ON: StatusCode = StatusCode(0x0502);
    pub const ANTENNA_NOT_CONNECTED: StatusCode = StatusCode(0x0503);
    pub const TEMPERATURE_EXCEED_LIMITS: StatusCode = StatusCode(0x0504);
    pub const HIGH_RETURN_LOSS: StatusCode = StatusCode(0x0505);

    pub const TAG_ID_BUFFER_NOT_ENOUGH_TAGS_AVAILABLE: StatusCode = StatusCode(0x0600);
    pub const TAG_ID_BUFFER_FULL: StatusCode = StatusCode(0x0601);
    pub const TAG_ID_BUFFER_REPEATED_TAG_ID: StatusCode = StatusCode(0x0602);
    pub const TAG_ID_BUFFER_NUM_TAG_TOO_LARGE: StatusCode = StatusCode(0x0603);

    pub const SYSTEM_UNKNOWN_ERROR: StatusCode = StatusCode(0x7F00);
    pub const ASSERT_FAILED: StatusCode = StatusCode(0x7F01);

    fn name(&self) -> Option<&'static str> {
        Some(match *self {
            StatusCode::MSG_WRONG_NUMBER_OF_DATA => "wrong number of data",
            StatusCode::INVALID_OPCODE => "invalid opcode",
            StatusCode::UNIMPLEMENTED_OPCODE => "unimplemented opcode",
            StatusCode::MSG_POWER_TOO_HIGH => "requested power too high",
            StatusCode::MSG_INVALID_FREQ_RECEIVED => "invalid frequency",
            StatusCode::MSG_INVALID_PARAMETER_VALUE => "invalid parameter value",
            StatusCode::MSG_POWER_TOO_LOW => "requested power too low",
            StatusCode::UNIMPLEMENTED_FEATURE => "unimplemented feature",
            StatusCode::INVALID_BAUD_RATE => "invalid baud rate",
            StatusCode::INVALID_REGION => "invalid region",
            StatusCode::NO_TAGS_FOUND => "no tags found",
            StatusCode::NO_PROTOCOL_DEFINED => "no protocol defined",
            StatusCode::INVALID_PROTOCOL_SPECIFIED => "invalid protocol",
            StatusCode::WRITE_PASSED_LOCK_FAILED => "write passed, lock failed",
            StatusCode::PROTOCOL_NO_DATA_READ => "no data could be read",
            StatusCode::AFE_NOT_ON => "AFE not on",
            StatusCode::PROTOCOL_WRITE_FAILED => "tag write failed",
            StatusCode::NOT_IMPLEMENTED_FOR_THIS_PROTOCOL => "not implemented for this protocol",
            StatusCode::PROTOCOL_INVALID_ADDRESS => "invalid tag address",
            StatusCode::GENERAL_TAG_ERROR => "general tag error",
            StatusCode::DATA_TOO_LARGE => "data too large",
            StatusCode::PROTOCOL_KILL_FAILED => "tag kill failed",
            StatusCode::GEN2_PROTOCOL_MEMORY_OVERRUN_BAD_PC => "memory overrun / bad PC",
            StatusCode::GEN2_PROTOCOL_MEMORY_LOCKED => "memory locked",
            StatusCode::GEN2_PROTOCOL_INSUFFICIENT_POWER => "tag has insufficient power",
            StatusCode::ANTENNA_NOT_CONNECTED => "antenna not connected",
            StatusCode::TEMPERATURE_EXCEED_LIMITS => "temperature limit exceeded",
            StatusCode::HIGH_RETURN_LOSS => "high return loss",
            StatusCode::TAG_ID_BUFFER_FULL => "tag ID buffer full",
            _ => return None,
        })
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:04X} ({name})", self.0),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

/// Represents the different error types that can occur in the m6e-rs crate.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    Serial(String),

    /// The transport or the device failed to respond within the deadline.
    #[error("Timeout")]
    Timeout,

    /// A received frame failed its CRC check.
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// A frame or payload could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The response opcode did not match the request opcode, which usually
    /// means the module rebooted between the previous command and this one.
    #[error("Device was reset mid-session")]
    DeviceReset,

    /// A non-zero status word from the module.
    #[error("Reader status {0}")]
    Reader(StatusCode),

    /// The tag buffer has been fully drained.
    #[error("No tags left in buffer")]
    NoTags,

    /// A requested antenna is not present in the port mask or Tx/Rx map.
    #[error("No antenna")]
    NoAntenna,

    /// The driver does not implement the requested operation.
    #[error("Unimplemented operation")]
    Unimplemented,

    /// The operation is not supported in the requested form.
    #[error("Unsupported operation")]
    Unsupported,

    /// Argument-level rejection before anything is sent to the module.
    #[error("Invalid argument: {0}")]
    Invalid(&'static str),

    /// The request would exceed the maximum packet size or a list capacity.
    #[error("Request too big")]
    TooBig,

    /// An attempt to set a read-only parameter.
    #[error("Parameter is read-only")]
    ReadOnly,

    /// The parameter key is not supported by the connected firmware.
    #[error("Parameter not found")]
    NotFound,

    /// The firmware image has a bad magic header or under-delivered bytes.
    #[error("Bad firmware image format")]
    FirmwareFormat,

    /// The background reader thread could not be started.
    #[error("Could not start background reader")]
    NoThreads,

    /// The listener list is currently locked by a dispatch in progress.
    #[error("Listener list busy, try again")]
    TryAgain,
}

impl ReaderError {
    /// True for the benign "inventory round found nothing" module status.
    pub fn is_no_tags_found(&self) -> bool {
        matches!(self, ReaderError::Reader(code) if *code == StatusCode::NO_TAGS_FOUND)
    }

    /// True when the module rejected the opcode outright.
    pub fn is_invalid_opcode(&self) -> bool {
        matches!(self, ReaderError::Reader(code) if *code == StatusCode::INVALID_OPCODE)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReaderError>;
