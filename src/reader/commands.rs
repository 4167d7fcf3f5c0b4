//! # Module Command Set
//!
//! Encoders and decoders for every serial command the driver issues, one
//! method per opcode/option pair. Methods named `cmd_*` perform a full
//! request/response exchange; `msg_*` helpers assemble sub-payloads that are
//! shared between standalone commands, the embedded-operation inventory and
//! the multi-protocol search.

use bitflags::bitflags;

use crate::constants::*;
use crate::error::{ReaderError, Result};
use crate::reader::frame::MsgBuf;
use crate::reader::serial::SerialReader;
use crate::reader::transport::SerialTransport;
use crate::reader::{
    MultipleStatus, PortDetect, PortPair, PortPowerAndSettlingTime, PowerMode, PowerWithLimits,
    Region, UserMode, VersionInfo,
};
use crate::tag::filter::TagFilter;
use crate::tag::gen2::{self, Gen2Bank, Gen2Q, Gen2Session, Gen2TagEncoding, Gen2Tari, Gen2Target};
use crate::tag::iso180006b;
use crate::tag::metadata::MetadataFlag;
use crate::tag::TagProtocol;
use crate::util::ByteCursor;

bitflags! {
    /// Search flags of the read-tag-multiple command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchFlag: u16 {
        const CONFIGURED_ANTENNA           = 0;
        const ANTENNA_1_THEN_2             = 1;
        const ANTENNA_2_THEN_1             = 2;
        const CONFIGURED_LIST              = 3;
        const EMBEDDED_COMMAND             = 4;
        const TAG_STREAMING                = 8;
        const LARGE_TAG_POPULATION_SUPPORT = 16;
    }
}

/// A reader-configuration value; the encoding is key-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    U8(u8),
}

/// One Gen2 protocol-configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gen2Configuration {
    Session(Gen2Session),
    Target(Gen2Target),
    TagEncoding(Gen2TagEncoding),
    /// Link frequency in kHz.
    LinkFrequency(u32),
    Tari(Gen2Tari),
    Q(Gen2Q),
}

/// Payload view of a raw response frame.
fn payload(raw: &[u8]) -> &[u8] {
    &raw[5..raw.len() - 2]
}

impl<T: SerialTransport> SerialReader<T> {
    // ------------------------------------------------------------------
    // System commands
    // ------------------------------------------------------------------

    /// Queries bootloader/hardware/firmware versions and the protocol
    /// support mask.
    pub async fn cmd_version(&mut self) -> Result<VersionInfo> {
        let msg = MsgBuf::new(OPCODE_VERSION);
        let raw = self.send(msg.finish()).await?;
        let mut cursor = ByteCursor::at(&raw, 5);

        let mut info = VersionInfo::default();
        info.bootloader.copy_from_slice(cursor.get_bytes(4)?);
        info.hardware.copy_from_slice(cursor.get_bytes(4)?);
        info.fw_date.copy_from_slice(cursor.get_bytes(4)?);
        info.fw_version.copy_from_slice(cursor.get_bytes(4)?);
        info.protocols = cursor.get_u32()?;
        Ok(info)
    }

    /// Starts the application image from the bootloader.
    pub async fn cmd_boot_firmware(&mut self) -> Result<()> {
        let msg = MsgBuf::new(OPCODE_BOOT_FIRMWARE);
        self.send_timeout(msg.finish(), 1000).await.map(|_| ())
    }

    /// Tells the module to change its line rate.
    pub async fn cmd_set_baud_rate(&mut self, rate: u32) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_BAUD_RATE);
        msg.put_u32(rate)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Erases a flash sector; only valid in the bootloader.
    pub async fn cmd_erase_flash(&mut self, sector: u8, password: u32) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_ERASE_FLASH);
        msg.put_u32(password)?;
        msg.put_u8(sector)?;
        self.send_timeout(msg.finish(), 30_000).await.map(|_| ())
    }

    /// Writes one page into a flash sector; only valid in the bootloader.
    pub async fn cmd_write_flash_sector(
        &mut self,
        sector: u8,
        address: u32,
        password: u32,
        data: &[u8],
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_WRITE_FLASH_SECTOR);
        msg.put_u32(password)?;
        msg.put_u32(address)?;
        msg.put_u8(sector)?;
        msg.put_bytes(data)?;
        self.send_timeout(msg.finish(), 3000).await.map(|_| ())
    }

    /// Drops from the application back into the bootloader.
    pub async fn cmd_boot_bootloader(&mut self) -> Result<()> {
        let msg = MsgBuf::new(OPCODE_BOOT_BOOTLOADER);
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Which image is running: bits 0..1 are 1 for bootloader, 2 for app.
    pub async fn cmd_get_current_program(&mut self) -> Result<u8> {
        let msg = MsgBuf::new(OPCODE_GET_CURRENT_PROGRAM);
        let raw = self.send(msg.finish()).await?;
        Ok(raw[5])
    }

    /// Raw hardware version info for the given option/flag pair.
    pub async fn cmd_get_hardware_version(&mut self, option: u8, flags: u8) -> Result<Vec<u8>> {
        let mut msg = MsgBuf::new(OPCODE_HW_VERSION);
        msg.put_u8(option)?;
        msg.put_u8(flags)?;
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw).to_vec())
    }

    /// Module temperature in degrees C.
    pub async fn cmd_get_temperature(&mut self) -> Result<u8> {
        let msg = MsgBuf::new(OPCODE_GET_TEMPERATURE);
        let raw = self.send(msg.finish()).await?;
        Ok(raw[5])
    }

    /// Feeds a license key to unlock protocol support.
    pub async fn cmd_set_protocol_license_key(&mut self, key: &[u8]) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_PROTOCOL_LICENSEKEY);
        msg.put_u8(0x01)?;
        msg.put_bytes(key)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Raw user-profile query; `request` is an opcode-specific option list.
    pub async fn cmd_get_user_profile(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let mut msg = MsgBuf::new(OPCODE_GET_USER_PROFILE);
        msg.put_bytes(request)?;
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw).to_vec())
    }

    // ------------------------------------------------------------------
    // Inventory commands
    // ------------------------------------------------------------------

    /// Writes the read-tag-multiple request body (everything after the
    /// opcode byte) into `msg`, shared by the standalone command, the
    /// embedded-op inventory and multi-protocol sub-commands.
    pub(crate) fn msg_setup_read_tag_multiple(
        &mut self,
        msg: &mut MsgBuf,
        timeout: u16,
        mut search_flags: SearchFlag,
        metadata: MetadataFlag,
        filter: Option<&TagFilter>,
        protocol: TagProtocol,
        access_password: u32,
    ) -> Result<()> {
        self.op_code = OPCODE_READ_TAG_ID_MULTIPLE;

        let optbyte = msg.position();
        msg.put_u8(0)?;
        if self.use_streaming {
            msg.or_u8(optbyte, GEN2_SINGULATION_FLAG_METADATA);
            search_flags |= SearchFlag::TAG_STREAMING | SearchFlag::LARGE_TAG_POPULATION_SUPPORT;
        }
        msg.put_u16(search_flags.bits())?;
        msg.put_u16(timeout)?;
        if self.use_streaming {
            msg.put_u16(metadata.bits())?;
        }

        // A null filter with a zero Gen2 password needs no singulation bytes
        // at all; for other protocols the "null" filter is not zero-length,
        // but this command does not need it either.
        if filter.is_some() || (protocol == TagProtocol::Gen2 && access_password == 0) {
            let option = filter_bytes(protocol, filter, msg, access_password, true)?;
            msg.or_u8(optbyte, option);
            if self.use_streaming {
                msg.or_u8(optbyte, GEN2_SINGULATION_FLAG_METADATA);
            }
        }
        Ok(())
    }

    /// One inventory round. In streaming mode the command is sent without
    /// waiting for a terminal reply and the count is unknown (zero here);
    /// otherwise the reply carries the buffered tag count.
    pub async fn cmd_read_tag_multiple(
        &mut self,
        timeout: u16,
        search_flags: SearchFlag,
        filter: Option<&TagFilter>,
        protocol: TagProtocol,
    ) -> Result<u32> {
        let mut msg = MsgBuf::new(OPCODE_READ_TAG_ID_MULTIPLE);
        self.msg_setup_read_tag_multiple(
            &mut msg,
            timeout,
            search_flags,
            MetadataFlag::ALL,
            filter,
            protocol,
            0,
        )?;
        self.op_code = OPCODE_READ_TAG_ID_MULTIPLE;

        if self.use_streaming {
            self.send_message(msg.finish(), u32::from(timeout)).await?;
            return Ok(0);
        }

        let raw = self.send_timeout(msg.finish(), u32::from(timeout)).await?;
        let body = payload(&raw);
        match raw[1] {
            // Plain 1-byte count: reader without large-tag-population support
            4 => Ok(u32::from(body[3])),
            // 1-byte count with the ISO18k select option echoed in the reply
            5 => Ok(u32::from(body[4])),
            // Plain 4-byte count: reader with large-tag-population support
            7 => Ok(u32::from_be_bytes([body[3], body[4], body[5], body[6]])),
            // 4-byte count with the ISO18k select option echoed in the reply
            8 => Ok(u32::from_be_bytes([body[4], body[5], body[6], body[7]])),
            _ => Err(ReaderError::Parse("unexpected tag-count reply".to_string())),
        }
    }

    /// Sends a prepared inventory-with-embedded-op frame and decodes the
    /// per-operation status counts.
    pub(crate) async fn execute_embedded_read(
        &mut self,
        msg: MsgBuf,
        timeout: u16,
    ) -> Result<MultipleStatus> {
        let raw = self.send_timeout(msg.finish(), u32::from(timeout)).await?;
        let body = payload(&raw);
        if body.len() < 10 {
            return Err(ReaderError::Parse("short embedded-status reply".to_string()));
        }
        Ok(MultipleStatus {
            tags_found: body[3],
            success_count: u16::from_be_bytes([body[6], body[7]]),
            failure_count: u16::from_be_bytes([body[8], body[9]]),
        })
    }

    /// One command searching several protocols back-to-back. Returns the
    /// total tag count (zero in streaming mode, where the count is unknown
    /// until the stream terminates).
    pub async fn cmd_multiple_protocol_search(
        &mut self,
        selections: &[(TagProtocol, Option<TagFilter>)],
        metadata: MetadataFlag,
        search_flags: SearchFlag,
        timeout: u16,
    ) -> Result<u32> {
        let mut msg = MsgBuf::new(OPCODE_MULTI_PROTOCOL_TAG_OP);
        msg.put_u16(timeout)?;
        msg.put_u8(0x11)?; // TM option: turns on metadata
        msg.put_u16(metadata.bits())?;
        msg.put_u8(OPCODE_READ_TAG_ID_MULTIPLE)?; // sub-command opcode
        msg.put_u16(0x0000)?; // search flags; only 0x0000 is supported here

        let sub_timeout = timeout / selections.len() as u16;
        for (protocol, filter) in selections {
            msg.put_u8(protocol.as_u8())?;
            let plen_index = msg.position();
            msg.put_u8(0)?;
            msg.put_u8(OPCODE_READ_TAG_ID_MULTIPLE)?;
            self.msg_setup_read_tag_multiple(
                &mut msg,
                sub_timeout,
                search_flags,
                metadata,
                filter.as_ref(),
                *protocol,
                0,
            )?;
            msg.patch_u8(plen_index, (msg.position() - plen_index - 2) as u8);
        }

        self.op_code = OPCODE_READ_TAG_ID_MULTIPLE;

        if self.use_streaming {
            self.send_message(msg.finish(), u32::from(timeout)).await?;
            self.tags_remaining = 1;
            Ok(0)
        } else {
            let raw = self.send_timeout(msg.finish(), u32::from(timeout)).await?;
            let body = payload(&raw);
            if body.len() < 8 {
                return Err(ReaderError::Parse("short search reply".to_string()));
            }
            let found = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
            self.tags_remaining = found;
            Ok(found)
        }
    }

    /// Discards the module-side tag buffer.
    pub async fn cmd_clear_tag_buffer(&mut self) -> Result<()> {
        let msg = MsgBuf::new(OPCODE_CLEAR_TAG_ID_BUFFER);
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Writes a new EPC to the singulated tag.
    pub(crate) async fn cmd_write_tag_epc(&mut self, timeout: u16, epc: &[u8]) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_WRITE_TAG_ID);
        msg.put_u16(timeout)?;
        msg.put_u16(0)?;
        msg.put_bytes(epc)?;
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Gen2 tag operations
    // ------------------------------------------------------------------

    pub(crate) fn msg_add_gen2_data_read(
        msg: &mut MsgBuf,
        timeout: u16,
        bank: Gen2Bank,
        word_address: u32,
        len: u8,
    ) -> Result<()> {
        msg.put_u8(OPCODE_READ_TAG_DATA)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0)?; // option, patched by the filter encoder
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(word_address)?;
        msg.put_u8(len)
    }

    pub(crate) fn msg_add_gen2_data_write(
        msg: &mut MsgBuf,
        timeout: u16,
        bank: Gen2Bank,
        word_address: u32,
    ) -> Result<()> {
        msg.put_u8(OPCODE_WRITE_TAG_DATA)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0)?; // option, patched by the filter encoder
        msg.put_u32(word_address)?;
        msg.put_u8(bank.as_u8())
    }

    pub(crate) fn msg_add_gen2_lock_tag(
        msg: &mut MsgBuf,
        timeout: u16,
        mask: u16,
        action: u16,
        access_password: u32,
    ) -> Result<()> {
        msg.put_u8(OPCODE_LOCK_TAG)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0)?; // option, patched by the filter encoder
        msg.put_u32(access_password)?;
        msg.put_u16(mask)?;
        msg.put_u16(action)
    }

    pub(crate) fn msg_add_gen2_kill_tag(
        msg: &mut MsgBuf,
        timeout: u16,
        kill_password: u32,
    ) -> Result<()> {
        msg.put_u8(OPCODE_KILL_TAG)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0)?; // option, patched by the filter encoder
        msg.put_u32(kill_password)
    }

    pub(crate) fn msg_add_gen2_block_write(
        msg: &mut MsgBuf,
        timeout: u16,
        bank: Gen2Bank,
        word_ptr: u32,
        data: &[u16],
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        msg.put_u8(OPCODE_WRITE_TAG_SPECIFIC)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0x00)?; // chip type
        let rec = msg.position();
        msg.put_u8(0x40)?; // option
        msg.put_u8(0x00)?;
        msg.put_u8(0xC7)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, msg, access_password, true)?;
        msg.or_u8(rec, option);
        msg.put_u8(0x00)?;
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(word_ptr)?;
        msg.put_u8(data.len() as u8)?;
        for word in data {
            msg.put_u16(*word)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn msg_add_gen2_block_permalock(
        msg: &mut MsgBuf,
        timeout: u16,
        read_lock: u8,
        bank: Gen2Bank,
        block_ptr: u32,
        block_range: u8,
        mask: &[u16],
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        msg.put_u8(OPCODE_ERASE_BLOCK_TAG_SPECIFIC)?;
        msg.put_u16(timeout)?;
        msg.put_u8(0x00)?; // chip type
        let rec = msg.position();
        msg.put_u8(0x40)?; // option
        msg.put_u8(0x01)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, msg, access_password, true)?;
        msg.or_u8(rec, option);
        msg.put_u8(0x00)?;
        msg.put_u8(read_lock)?;
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(block_ptr)?;
        msg.put_u8(block_range)?;
        if read_lock == 0x01 {
            for word in mask.iter().take(block_range as usize) {
                msg.put_u16(*word)?;
            }
        }
        Ok(())
    }

    /// Reads tag memory; returns the raw data bytes.
    pub async fn cmd_gen2_read_tag_data(
        &mut self,
        timeout: u16,
        bank: u8,
        word_address: u32,
        len: u8,
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<u8>> {
        let bank = bank_from_u8(bank)?;
        let mut msg = MsgBuf::new(OPCODE_READ_TAG_DATA);
        msg.put_u16(timeout)?;
        let optbyte = msg.position();
        msg.put_u8(0)?;
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(word_address)?;
        msg.put_u8(len)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, access_password, true)?;
        msg.or_u8(optbyte, option);

        let raw = self.send_timeout(msg.finish(), u32::from(timeout)).await?;
        // Skip the option byte echoed ahead of the data.
        Ok(payload(&raw)[1..].to_vec())
    }

    /// Writes tag memory word-at-a-time.
    pub async fn cmd_gen2_write_tag_data(
        &mut self,
        timeout: u16,
        bank: u8,
        word_address: u32,
        data: &[u8],
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let bank = bank_from_u8(bank)?;
        let mut msg = MsgBuf::new(OPCODE_WRITE_TAG_DATA);
        msg.put_u16(timeout)?;
        let optbyte = msg.position();
        msg.put_u8(0)?;
        msg.put_u32(word_address)?;
        msg.put_u8(bank.as_u8())?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, access_password, true)?;
        msg.or_u8(optbyte, option);
        msg.put_bytes(data)?;
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    /// Applies a Gen2 lock mask/action pair.
    pub async fn cmd_gen2_lock_tag(
        &mut self,
        timeout: u16,
        mask: u16,
        action: u16,
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_LOCK_TAG);
        msg.put_u16(timeout)?;
        let optbyte = msg.position();
        msg.put_u8(0)?;
        msg.put_u32(access_password)?;
        msg.put_u16(mask)?;
        msg.put_u16(action)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, 0, false)?;
        msg.or_u8(optbyte, option);
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    /// Kills the singulated tag.
    pub async fn cmd_kill_tag(
        &mut self,
        timeout: u16,
        kill_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_KILL_TAG);
        msg.put_u16(timeout)?;
        let optbyte = msg.position();
        msg.put_u8(0)?;
        msg.put_u32(kill_password)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, 0, false)?;
        msg.or_u8(optbyte, option);
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    /// BlockWrite: writes a run of words in one tag command.
    #[allow(clippy::too_many_arguments)]
    pub async fn cmd_block_write(
        &mut self,
        timeout: u16,
        bank: u8,
        word_ptr: u32,
        word_count: u8,
        data: &[u8],
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let bank = bank_from_u8(bank)?;
        let words: Vec<u16> = data
            .chunks_exact(2)
            .take(word_count as usize)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        let mut msg = MsgBuf::new(OPCODE_WRITE_TAG_SPECIFIC);
        msg.put_u16(timeout)?;
        msg.put_u8(0x00)?; // chip type
        let rec = msg.position();
        msg.put_u8(0x40)?; // option
        msg.put_u8(0x00)?;
        msg.put_u8(0xC7)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, access_password, true)?;
        msg.or_u8(rec, option);
        msg.put_u8(0x00)?;
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(word_ptr)?;
        msg.put_u8(words.len() as u8)?;
        for word in &words {
            msg.put_u16(*word)?;
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    /// BlockPermaLock: with `read_lock == 0` returns the current lock
    /// bitmap, with 1 permalocks the masked blocks.
    #[allow(clippy::too_many_arguments)]
    pub async fn cmd_block_permalock(
        &mut self,
        timeout: u16,
        read_lock: u8,
        bank: u8,
        block_ptr: u32,
        block_range: u8,
        mask: &[u16],
        access_password: u32,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<u16>> {
        let bank = bank_from_u8(bank)?;
        let mut msg = MsgBuf::new(OPCODE_ERASE_BLOCK_TAG_SPECIFIC);
        msg.put_u16(timeout)?;
        msg.put_u8(0x00)?; // chip type
        let rec = msg.position();
        msg.put_u8(0x40)?; // option
        msg.put_u8(0x01)?;
        let option = filter_bytes(TagProtocol::Gen2, filter, &mut msg, access_password, true)?;
        msg.or_u8(rec, option);
        msg.put_u8(0x00)?;
        msg.put_u8(read_lock)?;
        msg.put_u8(bank.as_u8())?;
        msg.put_u32(block_ptr)?;
        msg.put_u8(block_range)?;
        if read_lock == 0x01 {
            for word in mask.iter().take(block_range as usize) {
                msg.put_u16(*word)?;
            }
        }

        let raw = self.send(msg.finish()).await?;
        if read_lock == 0 {
            let body = &payload(&raw)[2..];
            Ok(body
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        } else {
            Ok(Vec::new())
        }
    }

    // ------------------------------------------------------------------
    // ISO 18000-6B tag operations
    // ------------------------------------------------------------------

    /// Reads up to 8 bytes of tag memory; the filter must name a full
    /// 8-byte identifier.
    pub async fn cmd_iso180006b_read_tag_data(
        &mut self,
        timeout: u16,
        byte_address: u8,
        len: u8,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<u8>> {
        let epc = match filter {
            Some(TagFilter::TagData { epc }) if epc.len() == 8 => epc.clone(),
            _ => return Err(ReaderError::Invalid("ISO 18000-6B read needs an 8-byte id")),
        };
        if len > 8 {
            return Err(ReaderError::Invalid("ISO 18000-6B read is at most 8 bytes"));
        }

        let mut msg = MsgBuf::new(OPCODE_READ_TAG_DATA);
        msg.put_u16(timeout)?;
        msg.put_u8(0x01)?; // standard read operation
        msg.put_u8(ISO180006B_COMMAND_READ)?;
        msg.put_u8(0x00)?; // RFU
        msg.put_u8(len)?;
        msg.put_u8(byte_address)?;
        msg.put_bytes(&epc)?;

        let raw = self.send_timeout(msg.finish(), u32::from(timeout)).await?;
        Ok(payload(&raw).to_vec())
    }

    /// Writes tag memory, either addressed to one tag or group-selected.
    pub async fn cmd_iso180006b_write_tag_data(
        &mut self,
        timeout: u16,
        byte_address: u8,
        data: &[u8],
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_WRITE_TAG_DATA);
        msg.put_u16(timeout)?;

        match filter {
            Some(TagFilter::TagData { epc }) if epc.len() == 8 => {
                msg.put_u8(
                    ISO180006B_WRITE_OPTION_READ_VERIFY_AFTER
                        | ISO180006B_WRITE_OPTION_COUNT_PROVIDED,
                )?;
                msg.put_u8(ISO180006B_COMMAND_WRITE4BYTE)?;
                msg.put_u8(ISO180006B_WRITE_LOCK_NO)?;
                msg.put_u8(byte_address)?;
                msg.put_bytes(epc)?;
            }
            _ => {
                msg.put_u8(ISO180006B_WRITE_OPTION_GROUP_SELECT)?;
                msg.put_u8(ISO180006B_COMMAND_WRITE4BYTE_MULTIPLE)?;
                msg.put_u8(ISO180006B_WRITE_LOCK_NO)?;
                msg.put_u8(byte_address)?;
                filter_bytes(TagProtocol::Iso180006b, filter, &mut msg, 0, false)?;
            }
        }
        msg.put_u16(data.len() as u16)?;
        msg.put_bytes(data)?;
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    /// Locks one byte of tag memory; the filter must name a full 8-byte id.
    pub async fn cmd_iso180006b_lock_tag(
        &mut self,
        timeout: u16,
        byte_address: u8,
        filter: Option<&TagFilter>,
    ) -> Result<()> {
        let epc = match filter {
            Some(TagFilter::TagData { epc }) if epc.len() == 8 => epc.clone(),
            _ => return Err(ReaderError::Invalid("ISO 18000-6B lock needs an 8-byte id")),
        };

        let mut msg = MsgBuf::new(OPCODE_LOCK_TAG);
        msg.put_u16(timeout)?;
        msg.put_u8(ISO180006B_LOCK_OPTION_TYPE_FOLLOWS)?;
        msg.put_u8(ISO180006B_LOCK_TYPE_QUERYLOCK_THEN_LOCK)?;
        msg.put_u8(byte_address)?;
        msg.put_bytes(&epc)?;
        self.send_timeout(msg.finish(), u32::from(timeout))
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Antenna commands
    // ------------------------------------------------------------------

    /// Sets the fixed Tx/Rx port pair for standalone tag operations.
    pub async fn cmd_set_tx_rx_ports(&mut self, tx_port: u8, rx_port: u8) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_ANTENNA_PORT);
        msg.put_u8(tx_port)?;
        msg.put_u8(rx_port)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    /// The currently configured Tx/Rx port pair.
    pub async fn cmd_get_tx_rx_ports(&mut self) -> Result<PortPair> {
        let mut msg = MsgBuf::new(OPCODE_GET_ANTENNA_PORT);
        msg.put_u8(0)?; // just configured ports
        let raw = self.send(msg.finish()).await?;
        Ok(PortPair {
            tx_port: raw[5],
            rx_port: raw[6],
        })
    }

    /// Installs the ordered antenna search list for inventory rounds.
    pub async fn cmd_set_antenna_search_list(&mut self, ports: &[PortPair]) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_ANTENNA_PORT);
        msg.put_u8(2)?; // logical antenna list option
        for pair in ports {
            msg.put_u8(pair.tx_port)?;
            msg.put_u8(pair.rx_port)?;
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Which physical ports exist and which have an antenna attached.
    pub async fn cmd_antenna_detect(&mut self) -> Result<Vec<PortDetect>> {
        let mut msg = MsgBuf::new(OPCODE_GET_ANTENNA_PORT);
        msg.put_u8(5)?; // antenna detect option
        let raw = self.send(msg.finish()).await?;
        let body = payload(&raw);

        let mut ports = Vec::new();
        let mut i = 1; // skip the echoed option byte
        while i + 1 < body.len() && ports.len() < MAX_ANTENNA_PORTS {
            ports.push(PortDetect {
                port: body[i],
                detected: body[i + 1] == 1,
            });
            i += 2;
        }
        Ok(ports)
    }

    /// Per-port read/write power and settling time.
    pub async fn cmd_get_antenna_port_powers_and_settling_time(
        &mut self,
    ) -> Result<Vec<PortPowerAndSettlingTime>> {
        let mut msg = MsgBuf::new(OPCODE_GET_ANTENNA_PORT);
        msg.put_u8(4)?; // power and settling time option
        let raw = self.send(msg.finish()).await?;
        let body = payload(&raw);

        let mut ports = Vec::new();
        let mut i = 1;
        while i + 6 < body.len() && ports.len() < MAX_ANTENNA_PORTS {
            ports.push(PortPowerAndSettlingTime {
                port: body[i],
                read_power: u16::from_be_bytes([body[i + 1], body[i + 2]]),
                write_power: u16::from_be_bytes([body[i + 3], body[i + 4]]),
                settling_time: u16::from_be_bytes([body[i + 5], body[i + 6]]),
            });
            i += 7;
        }
        Ok(ports)
    }

    pub async fn cmd_set_antenna_port_powers_and_settling_time(
        &mut self,
        ports: &[PortPowerAndSettlingTime],
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_ANTENNA_PORT);
        msg.put_u8(4)?; // power and settling time option
        for port in ports {
            msg.put_u8(port.port)?;
            msg.put_u16(port.read_power)?;
            msg.put_u16(port.write_power)?;
            msg.put_u16(port.settling_time)?;
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Radio commands
    // ------------------------------------------------------------------

    pub async fn cmd_set_read_tx_power(&mut self, power: u16) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_READ_TX_POWER);
        msg.put_u16(power)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_read_tx_power(&mut self) -> Result<u16> {
        let mut msg = MsgBuf::new(OPCODE_GET_READ_TX_POWER);
        msg.put_u8(0)?; // just return power
        let raw = self.send(msg.finish()).await?;
        Ok(u16::from_be_bytes([raw[6], raw[7]]))
    }

    pub async fn cmd_get_read_tx_power_with_limits(&mut self) -> Result<PowerWithLimits> {
        let mut msg = MsgBuf::new(OPCODE_GET_READ_TX_POWER);
        msg.put_u8(1)?; // return limits
        let raw = self.send(msg.finish()).await?;
        Ok(PowerWithLimits {
            set_power: u16::from_be_bytes([raw[6], raw[7]]),
            max_power: u16::from_be_bytes([raw[8], raw[9]]),
            min_power: u16::from_be_bytes([raw[10], raw[11]]),
        })
    }

    pub async fn cmd_set_write_tx_power(&mut self, power: u16) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_WRITE_TX_POWER);
        msg.put_u16(power)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_write_tx_power(&mut self) -> Result<u16> {
        let mut msg = MsgBuf::new(OPCODE_GET_WRITE_TX_POWER);
        msg.put_u8(0)?; // just return power
        let raw = self.send(msg.finish()).await?;
        Ok(u16::from_be_bytes([raw[6], raw[7]]))
    }

    // ------------------------------------------------------------------
    // Protocol / region / mode commands
    // ------------------------------------------------------------------

    pub async fn cmd_set_protocol(&mut self, protocol: TagProtocol) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_TAG_PROTOCOL);
        msg.put_u16(u16::from(protocol.as_u8()))?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_set_region(&mut self, region: Region) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_REGION);
        msg.put_u8(region as u8)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_set_region_lbt(&mut self, region: Region, lbt: bool) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_REGION);
        msg.put_u8(region as u8)?;
        msg.put_u8(u8::from(lbt))?;
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Whether listen-before-talk is enabled for the current region.
    pub async fn cmd_get_region_lbt_enabled(&mut self) -> Result<bool> {
        let mut msg = MsgBuf::new(OPCODE_GET_REGION);
        msg.put_u8(1)?;
        msg.put_u8(0x40)?; // LBT-enabled key
        let raw = self.send(msg.finish()).await?;
        Ok(raw[8] == 1)
    }

    pub async fn cmd_set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_POWER_MODE);
        msg.put_u8(mode as u8)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_power_mode(&mut self) -> Result<PowerMode> {
        let msg = MsgBuf::new(OPCODE_GET_POWER_MODE);
        let raw = self.send(msg.finish()).await?;
        Ok(PowerMode::from_u8(raw[5]))
    }

    pub async fn cmd_set_user_mode(&mut self, mode: UserMode) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_USER_MODE);
        msg.put_u8(mode as u8)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_user_mode(&mut self) -> Result<UserMode> {
        let msg = MsgBuf::new(OPCODE_GET_USER_MODE);
        let raw = self.send(msg.finish()).await?;
        UserMode::from_u8(raw[5])
            .ok_or_else(|| ReaderError::Parse("unknown user mode".to_string()))
    }

    /// Protocols this firmware build can run.
    pub async fn cmd_get_available_protocols(&mut self) -> Result<Vec<TagProtocol>> {
        let msg = MsgBuf::new(OPCODE_GET_AVAILABLE_PROTOCOLS);
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw)
            .chunks_exact(2)
            .map(|pair| TagProtocol::from_u8(pair[1]))
            .collect())
    }

    /// Regions this firmware build can be configured for.
    pub async fn cmd_get_available_regions(&mut self) -> Result<Vec<Region>> {
        let msg = MsgBuf::new(OPCODE_GET_AVAILABLE_REGIONS);
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw).iter().map(|b| Region::from_u8(*b)).collect())
    }

    // ------------------------------------------------------------------
    // Frequency hop table
    // ------------------------------------------------------------------

    pub async fn cmd_set_frequency_hop_table(&mut self, table: &[u32]) -> Result<()> {
        if table.len() > 62 {
            return Err(ReaderError::TooBig);
        }
        let mut msg = MsgBuf::new(OPCODE_SET_FREQ_HOP_TABLE);
        for freq in table {
            msg.put_u32(*freq)?;
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_frequency_hop_table(&mut self) -> Result<Vec<u32>> {
        let msg = MsgBuf::new(OPCODE_GET_FREQ_HOP_TABLE);
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw)
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub async fn cmd_set_frequency_hop_time(&mut self, hop_time: u32) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_FREQ_HOP_TABLE);
        msg.put_u8(1)?; // hop time option
        msg.put_u32(hop_time)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_frequency_hop_time(&mut self) -> Result<u32> {
        let mut msg = MsgBuf::new(OPCODE_GET_FREQ_HOP_TABLE);
        msg.put_u8(1)?; // get time
        let raw = self.send(msg.finish()).await?;
        Ok(u32::from_be_bytes([raw[6], raw[7], raw[8], raw[9]]))
    }

    // ------------------------------------------------------------------
    // GPIO commands
    // ------------------------------------------------------------------

    pub async fn cmd_set_gpio(&mut self, gpio: u8, high: bool) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_USER_GPIO_OUTPUTS);
        msg.put_u8(gpio)?;
        msg.put_u8(u8::from(high))?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_gpio(&mut self) -> Result<Vec<bool>> {
        let msg = MsgBuf::new(OPCODE_GET_USER_GPIO_INPUTS);
        let raw = self.send(msg.finish()).await?;
        Ok(payload(&raw).iter().map(|b| *b == 1).collect())
    }

    pub async fn cmd_get_gpio_direction(&mut self, pin: u8) -> Result<bool> {
        let mut msg = MsgBuf::new(OPCODE_SET_USER_GPIO_OUTPUTS);
        msg.put_u8(pin)?;
        let raw = self.send(msg.finish()).await?;
        Ok(raw[6] == 1)
    }

    pub async fn cmd_set_gpio_direction(&mut self, pin: u8, output: bool) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_USER_GPIO_OUTPUTS);
        msg.put_u8(1)?; // option flag
        msg.put_u8(pin)?;
        msg.put_u8(u8::from(output))?;
        msg.put_u8(0)?; // new value if output
        self.send(msg.finish()).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Reader configuration (key-value form)
    // ------------------------------------------------------------------

    /// Sets one reader-configuration key. The unique-by keys are inverted on
    /// the wire; the antenna-control-GPIO key takes a port mask byte.
    pub async fn cmd_set_reader_configuration(
        &mut self,
        key: u8,
        value: ConfigValue,
    ) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_READER_OPTIONAL_PARAMS);
        msg.put_u8(1)?; // key-value form of command
        msg.put_u8(key)?;

        match (key, value) {
            (CONFIGURATION_ANTENNA_CONTROL_GPIO, ConfigValue::U8(mask)) => {
                msg.put_u8(mask)?;
            }
            (CONFIGURATION_UNIQUE_BY_ANTENNA | CONFIGURATION_UNIQUE_BY_DATA, ConfigValue::Bool(b)) => {
                msg.put_u8(if b { 0 } else { 1 })?;
            }
            (
                CONFIGURATION_TRANSMIT_POWER_SAVE
                | CONFIGURATION_EXTENDED_EPC
                | CONFIGURATION_SAFETY_ANTENNA_CHECK
                | CONFIGURATION_SAFETY_TEMPERATURE_CHECK
                | CONFIGURATION_RECORD_HIGHEST_RSSI
                | CONFIGURATION_RSSI_IN_DBM,
                ConfigValue::Bool(b),
            ) => {
                msg.put_u8(u8::from(b))?;
            }
            _ => return Err(ReaderError::NotFound),
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    /// Shorthand for the common boolean keys.
    pub(crate) async fn cmd_set_reader_configuration_bool(
        &mut self,
        key: u8,
        value: bool,
    ) -> Result<()> {
        self.cmd_set_reader_configuration(key, ConfigValue::Bool(value))
            .await
    }

    pub async fn cmd_get_reader_configuration(&mut self, key: u8) -> Result<ConfigValue> {
        let mut msg = MsgBuf::new(OPCODE_GET_READER_OPTIONAL_PARAMS);
        msg.put_u8(1)?; // key-value form of command
        msg.put_u8(key)?;
        let raw = self.send(msg.finish()).await?;

        match key {
            CONFIGURATION_ANTENNA_CONTROL_GPIO => Ok(ConfigValue::U8(raw[7])),
            CONFIGURATION_UNIQUE_BY_ANTENNA | CONFIGURATION_UNIQUE_BY_DATA => {
                Ok(ConfigValue::Bool(raw[7] == 0))
            }
            CONFIGURATION_TRANSMIT_POWER_SAVE
            | CONFIGURATION_EXTENDED_EPC
            | CONFIGURATION_SAFETY_ANTENNA_CHECK
            | CONFIGURATION_SAFETY_TEMPERATURE_CHECK
            | CONFIGURATION_RECORD_HIGHEST_RSSI
            | CONFIGURATION_RSSI_IN_DBM => Ok(ConfigValue::Bool(raw[7] == 1)),
            _ => Err(ReaderError::NotFound),
        }
    }

    // ------------------------------------------------------------------
    // Protocol configuration
    // ------------------------------------------------------------------

    /// Sets one Gen2 protocol-configuration subkey with its value-specific
    /// encoding: the Q algorithm as dynamic vs static-with-initial, the
    /// target as a fixed 16-bit constant, the link frequency as an opaque
    /// byte and Tari as an enumerated byte.
    pub async fn cmd_set_gen2_configuration(&mut self, config: Gen2Configuration) -> Result<()> {
        let mut msg = MsgBuf::new(OPCODE_SET_PROTOCOL_PARAM);
        msg.put_u8(TagProtocol::Gen2.as_u8())?;

        match config {
            Gen2Configuration::Session(session) => {
                msg.put_u8(GEN2_CONFIGURATION_SESSION)?;
                msg.put_u8(session as u8)?;
            }
            Gen2Configuration::TagEncoding(encoding) => {
                msg.put_u8(GEN2_CONFIGURATION_TAGENCODING)?;
                msg.put_u8(encoding as u8)?;
            }
            Gen2Configuration::LinkFrequency(khz) => {
                msg.put_u8(GEN2_CONFIGURATION_LINKFREQUENCY)?;
                let blf = gen2::link_frequency_to_wire(khz)
                    .ok_or(ReaderError::Invalid("unsupported Gen2 link frequency"))?;
                msg.put_u8(blf)?;
            }
            Gen2Configuration::Tari(tari) => {
                msg.put_u8(GEN2_CONFIGURATION_TARI)?;
                msg.put_u8(tari as u8)?;
            }
            Gen2Configuration::Target(target) => {
                msg.put_u8(GEN2_CONFIGURATION_TARGET)?;
                msg.put_u16(target.wire_word())?;
            }
            Gen2Configuration::Q(q) => {
                msg.put_u8(GEN2_CONFIGURATION_Q)?;
                match q {
                    Gen2Q::Dynamic => msg.put_u8(0)?,
                    Gen2Q::Static { initial_q } => {
                        msg.put_u8(1)?;
                        msg.put_u8(initial_q)?;
                    }
                }
            }
        }
        self.send(msg.finish()).await.map(|_| ())
    }

    async fn gen2_configuration_reply(&mut self, subkey: u8) -> Result<Vec<u8>> {
        let mut msg = MsgBuf::new(OPCODE_GET_PROTOCOL_PARAM);
        msg.put_u8(TagProtocol::Gen2.as_u8())?;
        msg.put_u8(subkey)?;
        let raw = self.send(msg.finish()).await?;
        Ok(raw)
    }

    pub async fn cmd_get_gen2_session(&mut self) -> Result<Gen2Session> {
        let raw = self.gen2_configuration_reply(GEN2_CONFIGURATION_SESSION).await?;
        match raw[7] {
            0 => Ok(Gen2Session::S0),
            1 => Ok(Gen2Session::S1),
            2 => Ok(Gen2Session::S2),
            3 => Ok(Gen2Session::S3),
            other => Err(ReaderError::Parse(format!("unknown session {other}"))),
        }
    }

    pub async fn cmd_get_gen2_tag_encoding(&mut self) -> Result<Gen2TagEncoding> {
        let raw = self
            .gen2_configuration_reply(GEN2_CONFIGURATION_TAGENCODING)
            .await?;
        match raw[7] {
            0 => Ok(Gen2TagEncoding::Fm0),
            1 => Ok(Gen2TagEncoding::MillerM2),
            2 => Ok(Gen2TagEncoding::MillerM4),
            3 => Ok(Gen2TagEncoding::MillerM8),
            other => Err(ReaderError::Parse(format!("unknown tag encoding {other}"))),
        }
    }

    /// Link frequency in kHz, mapped back from the wire byte.
    pub async fn cmd_get_gen2_link_frequency(&mut self) -> Result<u32> {
        let raw = self
            .gen2_configuration_reply(GEN2_CONFIGURATION_LINKFREQUENCY)
            .await?;
        match raw[7] {
            0x00 => Ok(250),
            0x02 => Ok(400),
            0x03 => Ok(40),
            0x04 => Ok(640),
            other => Err(ReaderError::Parse(format!("unknown link frequency {other}"))),
        }
    }

    pub async fn cmd_get_gen2_tari(&mut self) -> Result<Gen2Tari> {
        let raw = self.gen2_configuration_reply(GEN2_CONFIGURATION_TARI).await?;
        match raw[7] {
            0 => Ok(Gen2Tari::Tari25us),
            1 => Ok(Gen2Tari::Tari12_5us),
            2 => Ok(Gen2Tari::Tari6_25us),
            other => Err(ReaderError::Parse(format!("unknown Tari {other}"))),
        }
    }

    pub async fn cmd_get_gen2_target(&mut self) -> Result<Gen2Target> {
        let raw = self.gen2_configuration_reply(GEN2_CONFIGURATION_TARGET).await?;
        let word = u16::from_be_bytes([raw[7], raw[8]]);
        Gen2Target::from_wire_word(word)
            .ok_or_else(|| ReaderError::Parse(format!("unknown target word 0x{word:04X}")))
    }

    pub async fn cmd_get_gen2_q(&mut self) -> Result<Gen2Q> {
        let raw = self.gen2_configuration_reply(GEN2_CONFIGURATION_Q).await?;
        match raw[7] {
            0 => Ok(Gen2Q::Dynamic),
            1 => Ok(Gen2Q::Static { initial_q: raw[8] }),
            other => Err(ReaderError::Parse(format!("unknown Q type {other}"))),
        }
    }

    /// Sets the ISO 18000-6B link frequency (kHz).
    pub async fn cmd_set_iso180006b_link_frequency(&mut self, khz: u32) -> Result<()> {
        let blf = iso180006b::link_frequency_to_wire(khz)
            .ok_or(ReaderError::Invalid("unsupported ISO 18000-6B link frequency"))?;
        let mut msg = MsgBuf::new(OPCODE_SET_PROTOCOL_PARAM);
        msg.put_u8(TagProtocol::Iso180006b.as_u8())?;
        msg.put_u8(ISO180006B_CONFIGURATION_LINKFREQUENCY)?;
        msg.put_u8(blf)?;
        self.send(msg.finish()).await.map(|_| ())
    }

    pub async fn cmd_get_iso180006b_link_frequency(&mut self) -> Result<u32> {
        let mut msg = MsgBuf::new(OPCODE_GET_PROTOCOL_PARAM);
        msg.put_u8(TagProtocol::Iso180006b.as_u8())?;
        msg.put_u8(ISO180006B_CONFIGURATION_LINKFREQUENCY)?;
        let raw = self.send(msg.finish()).await?;
        match raw[7] {
            0x00 => Ok(40),
            0x01 => Ok(160),
            other => Err(ReaderError::Parse(format!("unknown link frequency {other}"))),
        }
    }
}

fn bank_from_u8(bank: u8) -> Result<Gen2Bank> {
    match bank {
        0 => Ok(Gen2Bank::Reserved),
        1 => Ok(Gen2Bank::Epc),
        2 => Ok(Gen2Bank::Tid),
        3 => Ok(Gen2Bank::User),
        _ => Err(ReaderError::Invalid("Gen2 memory bank")),
    }
}

/// Singulation byte assembly shared by every tag-specific command. Appends
/// the filter (and access password) bytes to `msg` and returns the bits the
/// caller must OR into its option byte.
pub(crate) fn filter_bytes(
    protocol: TagProtocol,
    filter: Option<&TagFilter>,
    msg: &mut MsgBuf,
    access_password: u32,
    use_password: bool,
) -> Result<u8> {
    if filter.is_none() && access_password == 0 {
        return Ok(0);
    }

    match protocol {
        TagProtocol::Gen2 => {
            if use_password {
                msg.put_u32(access_password)?;
            }
            match filter {
                None => Ok(GEN2_SINGULATION_USE_PASSWORD),
                Some(TagFilter::Gen2Select {
                    bank,
                    bit_pointer,
                    mask_bit_length,
                    mask,
                    invert,
                }) => {
                    // Selecting on the EPC bank has a dedicated option value;
                    // the other banks pass through as-is.
                    let mut option = if bank.as_u8() == 1 {
                        GEN2_SINGULATION_SELECT_ON_ADDRESSED_EPC
                    } else {
                        bank.as_u8()
                    };
                    if *invert {
                        option |= GEN2_SINGULATION_INVERSE_SELECT_BIT;
                    }
                    if *mask_bit_length > 255 {
                        option |= GEN2_SINGULATION_EXTENDED_DATA_LENGTH;
                    }

                    msg.put_u32(*bit_pointer)?;
                    if *mask_bit_length > 255 {
                        msg.put_u8((mask_bit_length >> 8) as u8)?;
                    }
                    msg.put_u8(*mask_bit_length as u8)?;

                    let mask_bytes = usize::from(*mask_bit_length) / 8;
                    if mask.len() < mask_bytes {
                        return Err(ReaderError::Invalid("select mask shorter than its length"));
                    }
                    msg.put_bytes(&mask[..mask_bytes])?;
                    Ok(option)
                }
                Some(TagFilter::TagData { epc }) => {
                    let bit_count = epc.len() * 8;
                    let mut option = GEN2_SINGULATION_SELECT_ON_EPC;
                    if bit_count > 255 {
                        option |= GEN2_SINGULATION_EXTENDED_DATA_LENGTH;
                        msg.put_u8((bit_count >> 8) as u8)?;
                    }
                    msg.put_u8(bit_count as u8)?;
                    msg.put_bytes(epc)?;
                    Ok(option)
                }
                Some(TagFilter::Iso180006bSelect { .. }) => {
                    Err(ReaderError::Invalid("filter type does not match protocol"))
                }
            }
        }
        TagProtocol::Iso180006b => {
            match filter {
                None => {
                    // A match-anything select, since it is not the default.
                    msg.put_u8(iso180006b::SelectOp::Equals.as_u8())?;
                    msg.put_u8(0)?; // address
                    msg.put_u8(0)?; // mask: compare nothing
                    msg.put_u32(0)?;
                    msg.put_u32(0)?;
                    Ok(1)
                }
                Some(TagFilter::Iso180006bSelect {
                    op,
                    address,
                    mask,
                    data,
                    invert,
                }) => {
                    let op_byte = if *invert { op.as_u8() | 4 } else { op.as_u8() };
                    msg.put_u8(op_byte)?;
                    msg.put_u8(*address)?;
                    msg.put_u8(*mask)?;
                    msg.put_bytes(data)?;
                    Ok(1)
                }
                Some(TagFilter::TagData { epc }) => {
                    if epc.len() > 8 {
                        return Err(ReaderError::Invalid("identifier longer than 8 bytes"));
                    }
                    // Convert the byte count to an MSB-based bit mask.
                    let mask = ((0xFF00u16 >> epc.len()) & 0xFF) as u8;
                    msg.put_u8(iso180006b::SelectOp::Equals.as_u8())?;
                    msg.put_u8(0)?; // identifier sits at the start of memory
                    msg.put_u8(mask)?;
                    msg.put_bytes(epc)?;
                    for _ in epc.len()..8 {
                        msg.put_u8(0)?;
                    }
                    Ok(1)
                }
                Some(TagFilter::Gen2Select { .. }) => {
                    Err(ReaderError::Invalid("filter type does not match protocol"))
                }
            }
        }
        _ => Err(ReaderError::Invalid("protocol has no singulation support")),
    }
}
