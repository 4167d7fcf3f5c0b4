//! # Tag Data Model
//!
//! Types shared by the read pipeline and the tag operation layer: air
//! protocols, tag identity data, filters, operations and read plans.

pub mod filter;
pub mod gen2;
pub mod iso180006b;
pub mod metadata;
pub mod read_plan;
pub mod tagop;

use crate::constants::MAX_EPC_BYTE_COUNT;

/// The air protocols the module can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagProtocol {
    None = 0,
    Iso180006b = 3,
    Gen2 = 5,
    Iso180006bUcode = 6,
    Ipx64 = 7,
    Ipx256 = 8,
}

impl Default for TagProtocol {
    fn default() -> Self {
        TagProtocol::None
    }
}

impl TagProtocol {
    /// Wire identifier for this protocol.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> TagProtocol {
        match value {
            3 => TagProtocol::Iso180006b,
            5 => TagProtocol::Gen2,
            6 => TagProtocol::Iso180006bUcode,
            7 => TagProtocol::Ipx64,
            8 => TagProtocol::Ipx256,
            _ => TagProtocol::None,
        }
    }

    /// Tests this protocol against a version-info support bitmask, where bit
    /// `p - 1` is set iff protocol `p` is supported.
    pub fn supported_in(self, mask: u32) -> bool {
        let p = self as u8;
        p != 0 && (mask & (1 << (p - 1))) != 0
    }
}

/// A tag's identity as read from or written to the air.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    /// EPC bytes, truncated to [`MAX_EPC_BYTE_COUNT`].
    pub epc: Vec<u8>,
    /// CRC-16 read along with the EPC.
    pub crc: u16,
    /// Gen2 protocol-control word bytes, empty for other protocols.
    pub pc: Vec<u8>,
    /// Protocol the tag was read with.
    pub protocol: TagProtocol,
}

impl TagData {
    pub fn new(epc: Vec<u8>) -> TagData {
        let mut epc = epc;
        epc.truncate(MAX_EPC_BYTE_COUNT);
        TagData {
            epc,
            crc: 0,
            pc: Vec::new(),
            protocol: TagProtocol::None,
        }
    }

    /// EPC rendered as uppercase hex, the conventional display form.
    pub fn epc_hex(&self) -> String {
        hex::encode_upper(&self.epc)
    }
}

/// State of one GPIO pin in a tag read snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioPin {
    pub id: u8,
    pub high: bool,
}

/// Antenna and protocol used for standalone tag operations.
#[derive(Debug, Clone, Copy)]
pub struct TagOpParams {
    /// Logical antenna, or 0 when not yet chosen.
    pub antenna: u8,
    pub protocol: TagProtocol,
}

impl Default for TagOpParams {
    fn default() -> Self {
        TagOpParams {
            antenna: 0,
            protocol: TagProtocol::Gen2,
        }
    }
}
