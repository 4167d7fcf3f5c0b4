//! Per-tag metadata: the optional fields a tag record may carry and the
//! record parser shared by buffered and streaming result paths.

use bitflags::bitflags;

use crate::constants::MAX_EPC_BYTE_COUNT;
use crate::error::Result;
use crate::tag::{GpioPin, TagData, TagProtocol};
use crate::util::ByteCursor;

bitflags! {
    /// Which optional fields are present in a tag record. Fields appear on
    /// the wire in exactly this bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MetadataFlag: u16 {
        const READ_COUNT  = 0x0001;
        const RSSI        = 0x0002;
        const ANTENNA_ID  = 0x0004;
        const FREQUENCY   = 0x0008;
        const TIMESTAMP   = 0x0010;
        const PHASE       = 0x0020;
        const PROTOCOL    = 0x0040;
        const DATA        = 0x0080;
        const GPIO_STATUS = 0x0100;
        const ALL         = 0x01FF;
    }
}

/// One tag read, with whatever metadata the module attached to it.
#[derive(Debug, Clone, Default)]
pub struct TagReadData {
    pub tag: TagData,
    /// Which of the following fields carry real values.
    pub metadata_flags: MetadataFlag,
    /// How many times this tag was seen during the round.
    pub read_count: u8,
    /// Signal strength; dBm when the reader is configured to report dBm.
    pub rssi: i8,
    /// Logical antenna the tag was read on, after Tx/Rx map translation.
    pub antenna: u8,
    /// Carrier frequency in kHz.
    pub frequency: u32,
    /// Phase of the backscattered signal.
    pub phase: u16,
    /// Microseconds into the search when the tag was read, per the module DSP.
    pub dsp_micros: u32,
    /// Host clock at the read, folded from the search start time and
    /// `dsp_micros`. Millisecond count split into two 32-bit halves.
    pub timestamp_high: u32,
    pub timestamp_low: u32,
    /// GPIO snapshot at read time.
    pub gpio: Vec<GpioPin>,
    /// Data returned by an embedded tag operation, if any.
    pub data: Vec<u8>,
}

impl Default for MetadataFlag {
    fn default() -> Self {
        MetadataFlag::empty()
    }
}

/// Parses one tag record introduced by `flags` at the cursor position.
///
/// `gpio_count` is model-dependent: two pins on M5e-class hardware, four on
/// M6e. The EPC block at the end folds out the Gen2 PC word and the tag CRC
/// and clips oversized EPCs without losing frame alignment.
pub fn parse_tag_record(
    cursor: &mut ByteCursor<'_>,
    flags: MetadataFlag,
    gpio_count: u8,
) -> Result<TagReadData> {
    let mut read = TagReadData {
        metadata_flags: flags,
        ..TagReadData::default()
    };

    if flags.contains(MetadataFlag::READ_COUNT) {
        read.read_count = cursor.get_u8()?;
    }
    if flags.contains(MetadataFlag::RSSI) {
        read.rssi = cursor.get_u8()? as i8;
    }
    if flags.contains(MetadataFlag::ANTENNA_ID) {
        read.antenna = cursor.get_u8()?;
    }
    if flags.contains(MetadataFlag::FREQUENCY) {
        read.frequency = cursor.get_u24()?;
    }
    if flags.contains(MetadataFlag::TIMESTAMP) {
        read.dsp_micros = cursor.get_u32()?;
    }
    if flags.contains(MetadataFlag::PHASE) {
        read.phase = cursor.get_u16()?;
    }
    if flags.contains(MetadataFlag::PROTOCOL) {
        read.tag.protocol = TagProtocol::from_u8(cursor.get_u8()?);
    }
    if flags.contains(MetadataFlag::DATA) {
        let data_len = cursor.get_u16()? as usize / 8;
        read.data = cursor.get_bytes(data_len)?.to_vec();
    }
    if flags.contains(MetadataFlag::GPIO_STATUS) {
        let gpio_byte = cursor.get_u8()?;
        for pin in 0..gpio_count {
            read.gpio.push(GpioPin {
                id: pin + 1,
                high: (gpio_byte >> pin) & 0x1 == 1,
            });
        }
    }

    // EPC block: bit length covers PC (Gen2), EPC and tag CRC.
    let epc_bits = cursor.get_u16()? as usize;
    let mut epc_len = (epc_bits / 8).saturating_sub(2);
    if read.tag.protocol == TagProtocol::Gen2 {
        epc_len = epc_len.saturating_sub(2);
        read.tag.pc = cursor.get_bytes(2)?.to_vec();
    }
    let stored = epc_len.min(MAX_EPC_BYTE_COUNT);
    read.tag.epc = cursor.get_bytes(stored)?.to_vec();
    cursor.skip(epc_len - stored)?;
    read.tag.crc = cursor.get_u16()?;

    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes() -> Vec<u8> {
        // READ_COUNT | RSSI | ANTENNA_ID | PROTOCOL, one 4-byte Gen2 EPC
        let mut buf = vec![0x02, 0xD5, 0x11, 0x05];
        buf.extend_from_slice(&[0x00, 0x40]); // 64 bits: PC + EPC + CRC
        buf.extend_from_slice(&[0x30, 0x00]); // PC
        buf.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]); // EPC
        buf.extend_from_slice(&[0x12, 0x34]); // tag CRC
        buf
    }

    #[test]
    fn parses_selected_fields_and_epc() {
        let buf = record_bytes();
        let flags = MetadataFlag::READ_COUNT
            | MetadataFlag::RSSI
            | MetadataFlag::ANTENNA_ID
            | MetadataFlag::PROTOCOL;
        let mut cursor = ByteCursor::new(&buf);
        let read = parse_tag_record(&mut cursor, flags, 4).unwrap();

        assert_eq!(read.read_count, 2);
        assert_eq!(read.rssi, -43);
        assert_eq!(read.antenna, 0x11);
        assert_eq!(read.tag.protocol, TagProtocol::Gen2);
        assert_eq!(read.tag.pc, vec![0x30, 0x00]);
        assert_eq!(read.tag.epc, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(read.tag.crc, 0x1234);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn non_gen2_record_has_no_pc() {
        // PROTOCOL only, ISO 18000-6B, 8-byte identifier
        let mut buf = vec![0x03];
        buf.extend_from_slice(&[0x00, 0x50]); // 80 bits: EPC + CRC
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.extend_from_slice(&[0xAB, 0xCD]);

        let mut cursor = ByteCursor::new(&buf);
        let read = parse_tag_record(&mut cursor, MetadataFlag::PROTOCOL, 2).unwrap();

        assert_eq!(read.tag.protocol, TagProtocol::Iso180006b);
        assert!(read.tag.pc.is_empty());
        assert_eq!(read.tag.epc.len(), 8);
        assert_eq!(read.tag.crc, 0xABCD);
    }
}
