//! Tag filters: pre-inventory singulation criteria that narrow the tag
//! population a command applies to.

use crate::tag::gen2::Gen2Bank;
use crate::tag::iso180006b::SelectOp;

/// A filter restricting which tags respond to an inventory or tag operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// Match tags whose EPC starts with these bytes (MSB-aligned).
    TagData { epc: Vec<u8> },

    /// A Gen2 Select against an arbitrary memory region.
    Gen2Select {
        bank: Gen2Bank,
        /// Starting bit address within the bank.
        bit_pointer: u32,
        /// Length of the comparison, in bits.
        mask_bit_length: u16,
        mask: Vec<u8>,
        /// Select tags that do NOT match.
        invert: bool,
    },

    /// An ISO 18000-6B group select.
    Iso180006bSelect {
        op: SelectOp,
        address: u8,
        /// Byte mask: bit N compares data byte N.
        mask: u8,
        data: [u8; 8],
        invert: bool,
    },
}

impl TagFilter {
    /// Shorthand for an EPC-prefix filter.
    pub fn epc(epc: &[u8]) -> TagFilter {
        TagFilter::TagData { epc: epc.to_vec() }
    }
}
