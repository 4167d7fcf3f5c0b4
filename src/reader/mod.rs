//! # Serial Reader Engine
//!
//! The driver proper: frame codec, transport abstraction, command encoders,
//! the connection/boot state machine, the read pipeline, the typed parameter
//! registry, the background reader and the firmware loader.

pub mod background;
pub mod commands;
pub mod firmware;
pub mod frame;
pub mod params;
pub mod serial;
pub mod transport;
pub mod transport_mock;

pub use background::Reader;
pub use serial::SerialReader;
pub use transport::{NativeTransport, SerialTransport};

/// Version report returned by the module at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// Bootloader version, as four 8-bit numbers.
    pub bootloader: [u8; 4],
    /// Hardware version. Opaque format; the first byte selects the model.
    pub hardware: [u8; 4],
    /// Date the application firmware was built, as BCD YYYYMMDD.
    pub fw_date: [u8; 4],
    /// Application firmware version, as four 8-bit numbers.
    pub fw_version: [u8; 4],
    /// Bitmask of supported protocols, indexed by protocol number minus one.
    pub protocols: u32,
}

/// Module power-management mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PowerMode {
    Full = 0,
    MinSave = 1,
    MedSave = 2,
    MaxSave = 3,
    /// Not yet read from the module. Orders above every real mode so the
    /// wakeup preamble is applied until the true mode is known.
    Invalid = 4,
}

impl PowerMode {
    pub fn from_u8(value: u8) -> PowerMode {
        match value {
            0 => PowerMode::Full,
            1 => PowerMode::MinSave,
            2 => PowerMode::MedSave,
            3 => PowerMode::MaxSave,
            _ => PowerMode::Invalid,
        }
    }
}

/// Module user-mode hint, tuning defaults for a deployment style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UserMode {
    Unspecified = 0,
    Printer = 1,
    Conveyor = 2,
    Portal = 3,
    Handheld = 4,
}

impl UserMode {
    pub fn from_u8(value: u8) -> Option<UserMode> {
        match value {
            0 => Some(UserMode::Unspecified),
            1 => Some(UserMode::Printer),
            2 => Some(UserMode::Conveyor),
            3 => Some(UserMode::Portal),
            4 => Some(UserMode::Handheld),
            _ => None,
        }
    }
}

/// Regulatory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Region {
    None = 0,
    Na = 1,
    Eu = 2,
    Kr = 3,
    In = 4,
    Jp = 5,
    Prc = 6,
    Eu2 = 7,
    Eu3 = 8,
    Kr2 = 9,
    Open = 0xFF,
}

impl Region {
    pub fn from_u8(value: u8) -> Region {
        match value {
            1 => Region::Na,
            2 => Region::Eu,
            3 => Region::Kr,
            4 => Region::In,
            5 => Region::Jp,
            6 => Region::Prc,
            7 => Region::Eu2,
            8 => Region::Eu3,
            9 => Region::Kr2,
            0xFF => Region::Open,
            _ => Region::None,
        }
    }
}

/// One entry of the logical-antenna to physical-port map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaMapEntry {
    /// The antenna number - an arbitrary value.
    pub antenna: u8,
    /// The device antenna port to use for transmission.
    pub tx_port: u8,
    /// The device antenna port to use for reception.
    pub rx_port: u8,
}

/// A physical Tx/Rx port pair as the module addresses antennas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub tx_port: u8,
    pub rx_port: u8,
}

/// Result of the antenna-detect query for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDetect {
    pub port: u8,
    pub detected: bool,
}

/// Per-port power levels and settling time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortPowerAndSettlingTime {
    pub port: u8,
    pub read_power: u16,
    pub write_power: u16,
    pub settling_time: u16,
}

/// An antenna port with an associated value, for the per-port lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortValue {
    pub port: u8,
    pub value: u16,
}

/// Read TX power along with the hardware limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerWithLimits {
    pub set_power: u16,
    pub max_power: u16,
    pub min_power: u16,
}

/// Outcome of an inventory with an embedded tag operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultipleStatus {
    pub tags_found: u8,
    pub success_count: u16,
    pub failure_count: u16,
}

/// Options for the user-profile command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserProfileOption {
    Save,
    Restore,
    Verify,
    Clear,
}
