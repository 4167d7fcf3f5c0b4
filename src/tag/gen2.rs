//! EPCglobal Gen2 air-protocol types: memory banks, inventory session
//! parameters, singulation Q configuration and lock/write behavior.

use bitflags::bitflags;

/// Gen2 access password.
pub type Gen2Password = u32;

/// The four addressable memory banks of a Gen2 tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gen2Bank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

impl Gen2Bank {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Gen2 inventory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gen2Session {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
}

/// Gen2 inventoried-flag target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gen2Target {
    A,
    B,
    /// A first, then B.
    Ab,
    /// B first, then A.
    Ba,
}

impl Gen2Target {
    /// The 16-bit constant the module uses for each target setting.
    pub fn wire_word(self) -> u16 {
        match self {
            Gen2Target::A => 0x0100,
            Gen2Target::B => 0x0101,
            Gen2Target::Ab => 0x0000,
            Gen2Target::Ba => 0x0001,
        }
    }

    pub fn from_wire_word(word: u16) -> Option<Gen2Target> {
        match word {
            0x0100 => Some(Gen2Target::A),
            0x0101 => Some(Gen2Target::B),
            0x0000 => Some(Gen2Target::Ab),
            0x0001 => Some(Gen2Target::Ba),
            _ => None,
        }
    }
}

/// Tag-to-reader modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gen2TagEncoding {
    Fm0 = 0,
    MillerM2 = 1,
    MillerM4 = 2,
    MillerM8 = 3,
}

/// Reader-to-tag data-0 reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gen2Tari {
    Tari25us = 0,
    Tari12_5us = 1,
    Tari6_25us = 2,
}

/// Backscatter link frequency in kHz. The module encodes each supported rate
/// as an opaque byte; anything else is rejected.
pub fn link_frequency_to_wire(khz: u32) -> Option<u8> {
    match khz {
        40 => Some(0x03),
        250 => Some(0x00),
        400 => Some(0x02),
        640 => Some(0x04),
        _ => None,
    }
}

/// The Q algorithm governing inventory-round slot counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gen2Q {
    /// The module adapts Q on its own.
    Dynamic,
    /// A fixed initial Q.
    Static { initial_q: u8 },
}

bitflags! {
    /// Lock-action bits: each payload bit pairs with a mask bit that enables
    /// it, so a single 16-bit mask/action pair covers all five lock fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gen2LockBits: u16 {
        const USER_PERM   = 1 << 0;
        const USER        = 1 << 1;
        const TID_PERM    = 1 << 2;
        const TID         = 1 << 3;
        const EPC_PERM    = 1 << 4;
        const EPC         = 1 << 5;
        const ACCESS_PERM = 1 << 6;
        const ACCESS      = 1 << 7;
        const KILL_PERM   = 1 << 8;
        const KILL        = 1 << 9;
    }
}

/// A Gen2 lock command: which fields to change and what to change them to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gen2LockAction {
    pub mask: u16,
    pub action: u16,
}

impl Gen2LockAction {
    pub fn new(mask: Gen2LockBits, action: Gen2LockBits) -> Gen2LockAction {
        Gen2LockAction {
            mask: mask.bits(),
            action: action.bits(),
        }
    }
}

/// How `write_tag_mem_*` delivers data to the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gen2WriteMode {
    /// Word-at-a-time Write command only.
    WordOnly,
    /// BlockWrite command only.
    BlockOnly,
    /// Try BlockWrite first, fall back to word writes on any module error.
    BlockFallback,
}

impl Default for Gen2WriteMode {
    fn default() -> Self {
        Gen2WriteMode::WordOnly
    }
}
