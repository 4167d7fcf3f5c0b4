//! # Serial Reader
//!
//! The high-level driver for one connected module: command engine with
//! wakeup preamble, baud negotiation and boot sequencing, read-plan
//! execution, buffered and streaming result pagination, and the per-protocol
//! tag operations.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::constants::*;
use crate::error::{ReaderError, Result, StatusCode};
use crate::reader::commands::SearchFlag;
use crate::reader::frame::{crc16, MsgBuf};
use crate::reader::params::{Param, ParamBitSet, ParamValue};
use crate::reader::transport::SerialTransport;
use crate::reader::{AntennaMapEntry, MultipleStatus, PowerMode, Region, VersionInfo};
use crate::tag::filter::TagFilter;
use crate::tag::gen2::{Gen2LockAction, Gen2Password, Gen2Q, Gen2WriteMode};
use crate::tag::iso180006b::Iso180006bLockAction;
use crate::tag::metadata::{parse_tag_record, MetadataFlag, TagReadData};
use crate::tag::read_plan::{ReadPlan, SimpleReadPlan};
use crate::tag::tagop::TagOp;
use crate::tag::{GpioPin, TagData, TagOpParams, TagProtocol};

/// A lock request in the protocol the tag-op parameters select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Gen2(Gen2LockAction),
    Iso180006b(Iso180006bLockAction),
}

/// The serial reader handle. Owns the transport and all per-connection state.
pub struct SerialReader<T: SerialTransport> {
    pub(crate) transport: T,

    // User-configurable values
    pub(crate) baud_rate: u32,
    pub(crate) gen2_access_password: Gen2Password,
    pub(crate) transport_timeout_ms: u32,
    pub(crate) command_timeout_ms: u32,
    pub(crate) region: Region,
    pub(crate) read_plan: ReadPlan,
    pub(crate) async_on_time_ms: u32,
    pub(crate) async_off_time_ms: u32,
    pub(crate) write_mode: Gen2WriteMode,

    // Mostly-fixed information about the connected module
    pub(crate) connected: bool,
    pub(crate) version_info: VersionInfo,
    pub(crate) port_mask: u32,
    pub(crate) use_streaming: bool,

    // Cached values
    pub(crate) power_mode: PowerMode,
    pub(crate) current_protocol: TagProtocol,
    pub(crate) gpio_directions: Option<u8>,
    pub(crate) tx_rx_map: Vec<AntennaMapEntry>,
    pub(crate) tag_op_params: TagOpParams,

    pub(crate) param_present: ParamBitSet,
    pub(crate) param_confirmed: ParamBitSet,

    // Temporary storage during a read and the subsequent fetch of tags
    pub(crate) read_time_high: u32,
    pub(crate) read_time_low: u32,
    pub(crate) search_timeout_ms: u32,
    /// Tags the module reported but the caller has not drained. In streaming
    /// mode the exact quantity is unknown: non-zero means the end-of-stream
    /// frame has not been seen yet.
    pub(crate) tags_remaining: u32,
    /// Raw frame holding tag records not yet handed to the caller.
    pub(crate) buf_response: Vec<u8>,
    pub(crate) buf_pointer: usize,
    pub(crate) tags_remaining_in_buffer: u32,
    pub(crate) op_code: u8,
    /// Gen2 Q saved across a tag operation, restored afterwards.
    pub(crate) old_q: Option<Gen2Q>,
}

impl<T: SerialTransport> SerialReader<T> {
    /// Creates an unconnected reader over `transport`.
    pub fn new(transport: T) -> SerialReader<T> {
        SerialReader {
            transport,
            baud_rate: 115_200,
            gen2_access_password: 0,
            transport_timeout_ms: 2000,
            command_timeout_ms: 2000,
            region: Region::None,
            read_plan: ReadPlan::default(),
            async_on_time_ms: 250,
            async_off_time_ms: 0,
            write_mode: Gen2WriteMode::default(),
            connected: false,
            version_info: VersionInfo::default(),
            port_mask: 0,
            use_streaming: false,
            power_mode: PowerMode::Invalid,
            current_protocol: TagProtocol::None,
            gpio_directions: None,
            tx_rx_map: Vec::new(),
            tag_op_params: TagOpParams::default(),
            param_present: ParamBitSet::default(),
            param_confirmed: ParamBitSet::default(),
            read_time_high: 0,
            read_time_low: 0,
            search_timeout_ms: 0,
            tags_remaining: 0,
            buf_response: Vec::new(),
            buf_pointer: 0,
            tags_remaining_in_buffer: 0,
            op_code: 0,
            old_q: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    pub fn tx_rx_map(&self) -> &[AntennaMapEntry] {
        &self.tx_rx_map
    }

    pub fn port_mask(&self) -> u32 {
        self.port_mask
    }

    // ------------------------------------------------------------------
    // Command engine
    // ------------------------------------------------------------------

    fn effective_deadline(&self, timeout_ms: u32) -> Duration {
        Duration::from_millis(u64::from(timeout_ms) + u64::from(self.transport_timeout_ms))
    }

    /// Sends a framed request, preceded by a wakeup preamble when the module
    /// may be in a deep power-save state. Returns the request opcode.
    pub(crate) async fn send_message(&mut self, msg: Vec<u8>, timeout_ms: u32) -> Result<u8> {
        let deadline = self.effective_deadline(timeout_ms);

        if self.power_mode >= PowerMode::MedSave {
            // Tickle the line, then keep it busy for ~100 ms at the current
            // rate so the processor can spin its UART back up.
            let chunk = [0xFFu8; 16];
            self.transport.send_bytes(&chunk, deadline).await?;
            let bytes_per_100ms = self.baud_rate / 100;
            let mut sent: u32 = 0;
            while sent < bytes_per_100ms {
                self.transport.send_bytes(&chunk, deadline).await?;
                sent += chunk.len() as u32;
            }
        }

        let opcode = msg[2];
        self.transport.send_bytes(&msg, deadline).await?;
        Ok(opcode)
    }

    /// Receives one response frame, resynchronizing on the SOF byte, and
    /// checks CRC, opcode and status. Returns the raw frame.
    pub(crate) async fn receive_message(
        &mut self,
        expected_opcode: u8,
        timeout_ms: u32,
    ) -> Result<Vec<u8>> {
        let deadline = self.effective_deadline(timeout_ms);

        let mut buf = self.transport.receive_bytes(7, deadline).await?;
        let mut skew = 0usize;
        if buf[0] != SOF {
            match buf[1..6].iter().position(|&b| b == SOF) {
                Some(p) => {
                    skew = p + 1;
                    buf.drain(..skew);
                }
                None => return Err(ReaderError::Timeout),
            }
        }

        let len = buf[1] as usize;
        let remaining = len + skew;
        if remaining > 0 {
            let rest = self.transport.receive_bytes(remaining, deadline).await?;
            buf.extend_from_slice(&rest);
        }

        let expected = crc16(&buf[1..5 + len]);
        let actual = u16::from_be_bytes([buf[len + 5], buf[len + 6]]);
        if expected != actual {
            return Err(ReaderError::Crc { expected, actual });
        }

        let opcode = buf[2];
        if opcode != expected_opcode
            && !(opcode == OPCODE_MULTI_PROTOCOL_TAG_OP && self.use_streaming)
        {
            // A response for a command we did not send usually means the
            // module rebooted and emitted its boot-time message.
            return Err(ReaderError::DeviceReset);
        }

        let status = u16::from_be_bytes([buf[3], buf[4]]);
        if status != 0 {
            return Err(ReaderError::Reader(StatusCode(status)));
        }

        Ok(buf)
    }

    /// Sends a request and awaits its matching response.
    pub(crate) async fn send_timeout(&mut self, msg: Vec<u8>, timeout_ms: u32) -> Result<Vec<u8>> {
        let opcode = self.send_message(msg, timeout_ms).await?;
        self.receive_message(opcode, timeout_ms).await
    }

    /// Sends a request with the configured command timeout.
    pub(crate) async fn send(&mut self, msg: Vec<u8>) -> Result<Vec<u8>> {
        let timeout = self.command_timeout_ms;
        self.send_timeout(msg, timeout).await
    }

    // ------------------------------------------------------------------
    // Connection / boot
    // ------------------------------------------------------------------

    /// Connects to the module: negotiates a baud rate, leaves the
    /// bootloader, applies default configuration and detects antennas.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.open().await?;

        let mut rate = self.baud_rate;
        let mut contacted = false;
        for i in 0..=BAUD_FALLBACK_RATES.len() {
            if i == 0 {
                rate = self.baud_rate; // Try this first
            } else {
                rate = BAUD_FALLBACK_RATES[i - 1];
                if rate == self.baud_rate {
                    continue; // We already tried this one
                }
            }

            self.transport.set_baud_rate(rate).await?;
            self.transport.flush().await?;

            match self.cmd_version().await {
                Ok(info) => {
                    self.version_info = info;
                    contacted = true;
                    break;
                }
                // Timeouts usually mean "wrong baud rate", so just try the
                // next one. All other errors are real.
                Err(ReaderError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
        if !contacted {
            return Err(ReaderError::Timeout);
        }
        info!("contacted module at {rate} baud");
        self.connected = true;

        self.boot(rate).await
    }

    /// Post-contact boot sequence, shared by `connect`, user-profile restore
    /// and the firmware loader.
    pub(crate) async fn boot(&mut self, current_baud_rate: u32) -> Result<()> {
        let program = self.cmd_get_current_program().await?;
        if program & 0x3 == 1 {
            // Bootloader is running; start the application. Its reply is
            // unreliable across firmware revisions, so the result is ignored.
            let _ = self.cmd_boot_firmware().await;
        }

        // Read the power mode as soon as possible: until it is known, every
        // command pays for a full wakeup preamble.
        if self.power_mode == PowerMode::Invalid {
            self.power_mode = self.cmd_get_power_mode().await?;
        }

        if self.baud_rate != current_baud_rate {
            self.cmd_set_baud_rate(self.baud_rate).await?;
            self.transport.set_baud_rate(self.baud_rate).await?;
        }

        self.version_info = self.cmd_version().await?;
        self.gpio_directions = None;
        self.use_streaming = self.version_info.hardware[0] == MODEL_M6E;
        self.use_streaming = false; // disabled pending a module-side streaming fix

        self.seed_param_presence();

        // This bit is also reset whenever the protocol changes, so it is
        // reasserted inside set_protocol too.
        self.cmd_set_reader_configuration_bool(CONFIGURATION_EXTENDED_EPC, true)
            .await?;

        if self.region != Region::None {
            let region = self.region;
            self.cmd_set_region(region).await?;
        }

        self.tag_op_params = TagOpParams::default();

        self.init_tx_rx_map_from_ports().await
    }

    /// Shuts down the transport and marks the reader disconnected.
    pub async fn destroy(&mut self) -> Result<()> {
        self.transport.shutdown().await?;
        self.connected = false;
        Ok(())
    }

    /// Builds the default identity Tx/Rx map from the detected ports.
    pub(crate) async fn init_tx_rx_map_from_ports(&mut self) -> Result<()> {
        let ports = self.cmd_antenna_detect().await?;

        self.port_mask = 0;
        self.tx_rx_map.clear();
        for port in &ports {
            self.port_mask |= 1 << (port.port - 1);
            self.tx_rx_map.push(AntennaMapEntry {
                antenna: port.port,
                tx_port: port.port,
                rx_port: port.port,
            });
            if self.tag_op_params.antenna == 0 && port.detected {
                self.tag_op_params.antenna = port.port;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search preparation
    // ------------------------------------------------------------------

    async fn auto_detect_antenna_list(&mut self) -> Result<()> {
        let ports = self.cmd_antenna_detect().await?;

        let mut search_list = Vec::new();
        for port in ports.iter().filter(|p| p.detected) {
            if let Some(entry) = self.tx_rx_map.iter().find(|e| e.tx_port == port.port) {
                search_list.push(crate::reader::PortPair {
                    tx_port: entry.tx_port,
                    rx_port: entry.rx_port,
                });
            }
        }
        if search_list.is_empty() {
            return Err(ReaderError::NoAntenna);
        }
        self.cmd_set_antenna_search_list(&search_list).await
    }

    async fn set_antenna_list(&mut self, antennas: &[u8]) -> Result<()> {
        let mut search_list = Vec::new();
        for antenna in antennas {
            if let Some(entry) = self.tx_rx_map.iter().find(|e| e.antenna == *antenna) {
                search_list.push(crate::reader::PortPair {
                    tx_port: entry.tx_port,
                    rx_port: entry.rx_port,
                });
            }
        }
        self.cmd_set_antenna_search_list(&search_list).await
    }

    async fn prep_for_search(&mut self, antennas: &[u8]) -> Result<()> {
        if antennas.is_empty() {
            self.auto_detect_antenna_list().await
        } else {
            self.set_antenna_list(antennas).await
        }
    }

    /// Switches the module protocol and reasserts the extended-EPC bit,
    /// which the protocol change clears.
    pub(crate) async fn set_protocol(&mut self, protocol: TagProtocol) -> Result<()> {
        self.cmd_set_protocol(protocol).await?;
        self.cmd_set_reader_configuration_bool(CONFIGURATION_EXTENDED_EPC, true)
            .await?;
        self.current_protocol = protocol;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read plan validation
    // ------------------------------------------------------------------

    /// Checks a plan against the connected module: protocols must be
    /// supported, antennas must exist in the Tx/Rx map, list operations are
    /// rejected, and a weighted multi-plan must have positive total weight
    /// (zero total weight is only meaningful as a multi-protocol search).
    pub(crate) fn validate_read_plan(&self, plan: &ReadPlan) -> bool {
        match plan {
            ReadPlan::Multi(multi) => {
                if multi.plans.is_empty() {
                    return false;
                }
                if !multi.plans.iter().all(|p| self.validate_read_plan(p)) {
                    return false;
                }
                multi.total_weight() > 0 || multi.is_multi_protocol_search()
            }
            ReadPlan::Simple(simple) => {
                if !simple.protocol.supported_in(self.version_info.protocols) {
                    return false;
                }
                for antenna in &simple.antennas {
                    if !self.tx_rx_map.iter().any(|e| e.antenna == *antenna) {
                        return false;
                    }
                }
                !matches!(simple.tag_op, Some(TagOp::List(_)))
            }
        }
    }

    /// Installs a new read plan after validation.
    pub async fn set_read_plan(&mut self, plan: ReadPlan) -> Result<()> {
        self.param_set(Param::ReadPlan, ParamValue::ReadPlan(plan))
            .await
    }

    // ------------------------------------------------------------------
    // Read pipeline
    // ------------------------------------------------------------------

    /// Runs the configured read plan for `timeout_ms` and returns the number
    /// of tags the module reported. Results are drained with
    /// [`SerialReader::has_more_tags`] / [`SerialReader::get_next_tag`].
    pub async fn read(&mut self, timeout_ms: u32) -> Result<u32> {
        self.cmd_clear_tag_buffer().await?;
        self.tags_remaining = 0;
        self.tags_remaining_in_buffer = 0;

        let plan = self.read_plan.clone();
        self.read_internal(timeout_ms, &plan).await
    }

    fn read_internal<'a>(
        &'a mut self,
        timeout_ms: u32,
        plan: &'a ReadPlan,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + 'a>> {
        Box::pin(async move {
            match plan {
                ReadPlan::Multi(multi) if multi.is_multi_protocol_search() => {
                    if multi.plans.len() > MAX_SERIAL_MULTIPROTOCOL_LENGTH {
                        return Err(ReaderError::TooBig);
                    }

                    let mut subplans = Vec::with_capacity(multi.plans.len());
                    for child in &multi.plans {
                        match child {
                            ReadPlan::Simple(simple) => subplans.push(simple),
                            ReadPlan::Multi(_) => return Err(ReaderError::Invalid("read plan")),
                        }
                    }

                    let mut search_flags = SearchFlag::CONFIGURED_LIST;
                    if self.use_streaming {
                        search_flags |= SearchFlag::TAG_STREAMING;
                    }

                    // The first child's antenna list stands in for the whole
                    // plan; the command has no per-protocol antenna field.
                    let antennas = subplans[0].antennas.clone();
                    self.prep_for_search(&antennas).await?;

                    let selections: Vec<(TagProtocol, Option<TagFilter>)> = subplans
                        .iter()
                        .map(|p| (p.protocol, p.filter.clone()))
                        .collect();

                    self.cmd_multiple_protocol_search(
                        &selections,
                        MetadataFlag::ALL,
                        search_flags,
                        timeout_ms as u16,
                    )
                    .await
                }
                ReadPlan::Multi(multi) => {
                    let total_weight = multi.total_weight();
                    let mut count = 0u32;
                    let mut spent = 0u32;
                    for (i, child) in multi.plans.iter().enumerate() {
                        // Integer division shortfall goes to the last child
                        // so the sub-timeouts add up to the full timeout.
                        let sub_timeout = if i + 1 == multi.plans.len() {
                            timeout_ms - spent
                        } else {
                            child.weight() * timeout_ms / total_weight
                        };
                        spent += sub_timeout;

                        match self.read_internal(sub_timeout, child).await {
                            Ok(c) => count += c,
                            Err(e) if e.is_no_tags_found() => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(count)
                }
                ReadPlan::Simple(simple) => self.read_simple(timeout_ms, simple).await,
            }
        })
    }

    async fn read_simple(&mut self, timeout_ms: u32, plan: &SimpleReadPlan) -> Result<u32> {
        self.prep_for_search(&plan.antennas).await?;

        if self.current_protocol != plan.protocol {
            self.set_protocol(plan.protocol).await?;
        }

        // Cache the read time so it can be folded into tag timestamps later.
        let (high, low) = host_time_ms();
        self.read_time_high = high;
        self.read_time_low = low;
        self.search_timeout_ms = timeout_ms;

        let start = tokio::time::Instant::now();
        let mut total = 0u32;
        loop {
            let elapsed = start.elapsed().as_millis() as u32;
            if elapsed >= timeout_ms {
                break;
            }
            let read_time = (timeout_ms - elapsed).min(65_535) as u16;

            let result = match &plan.tag_op {
                None => {
                    self.cmd_read_tag_multiple(
                        read_time,
                        SearchFlag::CONFIGURED_LIST,
                        plan.filter.as_ref(),
                        plan.protocol,
                    )
                    .await
                }
                Some(op) => self
                    .embedded_read(read_time, timeout_ms, plan, op)
                    .await
                    .map(|status| u32::from(status.tags_found)),
            };

            let count = match result {
                Ok(count) => count,
                Err(e) if e.is_no_tags_found() => 0,
                Err(e) => return Err(e),
            };

            self.tags_remaining += count;
            total += count;

            if self.use_streaming {
                self.tags_remaining = 1;
                break;
            }
        }

        Ok(total)
    }

    /// Builds and executes an inventory with one embedded tag operation.
    async fn embedded_read(
        &mut self,
        read_time: u16,
        timeout_ms: u32,
        plan: &SimpleReadPlan,
        op: &TagOp,
    ) -> Result<MultipleStatus> {
        let password = self.gen2_access_password;
        let mut msg = MsgBuf::new(OPCODE_READ_TAG_ID_MULTIPLE);
        self.msg_setup_read_tag_multiple(
            &mut msg,
            read_time,
            SearchFlag::CONFIGURED_LIST | SearchFlag::EMBEDDED_COMMAND,
            MetadataFlag::ALL,
            plan.filter.as_ref(),
            plan.protocol,
            password,
        )?;

        msg.put_u8(1)?; // embedded command count
        let len_byte = msg.position();
        msg.put_u8(0)?; // sub-command length, installed below

        match op {
            TagOp::Gen2ReadData {
                bank,
                word_address,
                len,
            } => {
                Self::msg_add_gen2_data_read(&mut msg, 0, *bank, *word_address, *len)?;
            }
            TagOp::Gen2WriteData {
                bank,
                word_address,
                data,
            } => {
                Self::msg_add_gen2_data_write(&mut msg, 0, *bank, *word_address)?;
                for word in data {
                    msg.put_u16(*word)?;
                }
            }
            TagOp::Gen2Lock {
                action,
                access_password,
            } => {
                Self::msg_add_gen2_lock_tag(&mut msg, 0, action.mask, action.action, *access_password)?;
            }
            TagOp::Gen2Kill { kill_password } => {
                Self::msg_add_gen2_kill_tag(&mut msg, 0, *kill_password)?;
            }
            TagOp::Gen2BlockWrite {
                bank,
                word_ptr,
                data,
            } => {
                Self::msg_add_gen2_block_write(&mut msg, 0, *bank, *word_ptr, data, 0, None)?;
            }
            TagOp::Gen2BlockPermaLock {
                read_lock,
                bank,
                block_ptr,
                block_range,
                mask,
            } => {
                Self::msg_add_gen2_block_permalock(
                    &mut msg,
                    0,
                    *read_lock,
                    *bank,
                    *block_ptr,
                    *block_range,
                    mask,
                    0,
                    None,
                )?;
            }
            TagOp::List(_) => return Err(ReaderError::Unimplemented),
            _ => return Err(ReaderError::Invalid("tag operation")),
        }

        let sub_len = (msg.position() - (len_byte + 2)) as u8;
        msg.patch_u8(len_byte, sub_len);

        self.execute_embedded_read(msg, timeout_ms as u16).await
    }

    // ------------------------------------------------------------------
    // Result pagination
    // ------------------------------------------------------------------

    /// Whether another tag record is available. In streaming mode an empty
    /// local buffer makes this block for the next stream frame; a `0x00`
    /// end-of-stream frame restores the saved Gen2 Q and ends the search.
    pub async fn has_more_tags(&mut self) -> Result<bool> {
        if self.use_streaming && self.tags_remaining_in_buffer == 0 {
            if self.tags_remaining == 0 {
                return Ok(false);
            }
            let timeout = self.search_timeout_ms;
            let raw = self
                .receive_message(OPCODE_READ_TAG_ID_MULTIPLE, timeout)
                .await?;

            // Need enough bytes to reach the response-type field; stream
            // status notifications are not tag records.
            if (raw[1] as usize) < 6 || raw[2] == OPCODE_MULTI_PROTOCOL_TAG_OP {
                return Err(ReaderError::Parse("truncated stream frame".to_string()));
            }
            let response_type_pos = if raw[5] & 0x10 == 0x10 { 10 } else { 8 };
            match raw[response_type_pos] {
                0x01 => {
                    // Stream continues after this message.
                    self.buf_response = raw;
                    self.tags_remaining_in_buffer = 1;
                    self.buf_pointer = 11;
                    Ok(true)
                }
                0x00 => {
                    // Stream ends with this message.
                    self.tags_remaining = 0;
                    if let Some(old_q) = self.old_q.take() {
                        self.param_set(Param::Gen2Q, ParamValue::Gen2Q(old_q)).await?;
                    }
                    Ok(false)
                }
                other => Err(ReaderError::Parse(format!(
                    "unknown stream response type 0x{other:02X}"
                ))),
            }
        } else {
            Ok(self.tags_remaining > 0)
        }
    }

    /// Returns the next buffered tag record, refilling the local buffer from
    /// the module when it runs dry.
    pub async fn get_next_tag(&mut self) -> Result<TagReadData> {
        if self.tags_remaining == 0 {
            return Err(ReaderError::NoTags);
        }

        if self.tags_remaining_in_buffer == 0 {
            if self.use_streaming {
                if !self.has_more_tags().await? {
                    return Err(ReaderError::NoTags);
                }
            } else if self.op_code == OPCODE_READ_TAG_ID_MULTIPLE {
                let mut msg = MsgBuf::new(OPCODE_GET_TAG_ID_BUFFER);
                msg.put_u16(MetadataFlag::ALL.bits())?;
                msg.put_u8(0)?; // read options
                let raw = self.send(msg.finish()).await?;
                if raw.len() < 9 {
                    return Err(ReaderError::Parse("short tag-buffer reply".to_string()));
                }
                self.tags_remaining_in_buffer = u32::from(raw[8]);
                self.buf_pointer = 9;
                self.buf_response = raw;
            } else {
                return Err(ReaderError::Reader(StatusCode::INVALID_OPCODE));
            }
        }

        let flags_offset = if self.use_streaming { 8 } else { 5 };
        let flags = MetadataFlag::from_bits_truncate(u16::from_be_bytes([
            self.buf_response[flags_offset],
            self.buf_response[flags_offset + 1],
        ]));
        let gpio_count = self.gpio_count();

        let (mut read, new_pos) = {
            let mut cursor =
                crate::util::ByteCursor::at(&self.buf_response, self.buf_pointer);
            let read = parse_tag_record(&mut cursor, flags, gpio_count)?;
            (read, cursor.position())
        };
        self.buf_pointer = new_pos;

        self.postprocess_metadata(&mut read);

        self.tags_remaining_in_buffer -= 1;
        if !self.use_streaming {
            self.tags_remaining -= 1;
        }

        Ok(read)
    }

    fn gpio_count(&self) -> u8 {
        match self.version_info.hardware[0] {
            MODEL_M5E => 2,
            _ => 4,
        }
    }

    /// Folds the DSP microsecond offset into the host clock snapshot and
    /// maps the hardware (tx, rx) port pair back to the logical antenna.
    fn postprocess_metadata(&self, read: &mut TagReadData) {
        read.timestamp_high = self.read_time_high;
        let low = self.read_time_low.wrapping_add(read.dsp_micros / 1000);
        if low < self.read_time_low {
            read.timestamp_high += 1;
        }
        read.timestamp_low = low;

        if read.antenna != 0 {
            let rx = read.antenna & 0xF;
            let tx = read.antenna >> 4;
            if let Some(entry) = self
                .tx_rx_map
                .iter()
                .find(|e| e.rx_port == rx && e.tx_port == tx)
            {
                read.antenna = entry.antenna;
            }
        }
    }

    // ------------------------------------------------------------------
    // Tag operations
    // ------------------------------------------------------------------

    /// Executes a standalone tag operation through an embedded-command
    /// inventory on the tag-op antenna and protocol. The Gen2 Q is pinned to
    /// static 0 for the operation and restored afterwards.
    pub async fn execute_tag_op(&mut self, op: &TagOp) -> Result<u32> {
        let old_q = match self.param_get(Param::Gen2Q).await? {
            ParamValue::Gen2Q(q) => q,
            _ => return Err(ReaderError::Parse("unexpected parameter value".to_string())),
        };
        self.old_q = Some(old_q);

        self.param_set(
            Param::Gen2Q,
            ParamValue::Gen2Q(Gen2Q::Static { initial_q: 0 }),
        )
        .await?;

        let mut plan = SimpleReadPlan::new(
            vec![self.tag_op_params.antenna],
            self.tag_op_params.protocol,
            1,
        );
        plan.tag_op = Some(op.clone());
        let plan = ReadPlan::Simple(plan);

        let timeout = self.command_timeout_ms;
        let result = self.read_internal(timeout, &plan).await;

        // The saved Q is restored whether the operation succeeded or not;
        // in streaming mode the end-of-stream frame performs the restore.
        if !self.use_streaming {
            if let Some(old_q) = self.old_q.take() {
                self.param_set(Param::Gen2Q, ParamValue::Gen2Q(old_q)).await?;
            }
        }

        let count = result?;
        if count == 0 {
            return Err(ReaderError::Reader(StatusCode::NO_TAGS_FOUND));
        }
        Ok(count)
    }

    /// Writes a new EPC to the tag in view.
    pub async fn write_tag(&mut self, filter: Option<&TagFilter>, data: &TagData) -> Result<()> {
        let protocol = self.tag_op_params.protocol;
        self.set_protocol(protocol).await?;

        if protocol == TagProtocol::Gen2 {
            // The module cannot select a tag before writing its EPC.
            if filter.is_some() {
                return Err(ReaderError::Unsupported);
            }
            let timeout = self.command_timeout_ms as u16;
            self.cmd_write_tag_epc(timeout, &data.epc).await
        } else {
            Err(ReaderError::Unimplemented)
        }
    }

    /// Reads `word_count` 16-bit words of tag memory.
    pub async fn read_tag_mem_words(
        &mut self,
        filter: Option<&TagFilter>,
        bank: u32,
        word_address: u32,
        word_count: usize,
    ) -> Result<Vec<u16>> {
        let bytes = self
            .read_tag_mem_bytes(filter, bank, word_address * 2, word_count * 2)
            .await?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Reads tag memory at byte granularity; Gen2 unaligned requests are
    /// widened to word boundaries and trimmed after the read.
    pub async fn read_tag_mem_bytes(
        &mut self,
        filter: Option<&TagFilter>,
        bank: u32,
        byte_address: u32,
        byte_count: usize,
    ) -> Result<Vec<u8>> {
        let protocol = self.tag_op_params.protocol;
        self.set_protocol(protocol).await?;

        match protocol {
            TagProtocol::Gen2 => {
                let timeout = self.command_timeout_ms as u16;
                let password = self.gen2_access_password;
                if byte_address & 1 != 0 || byte_count & 1 != 0 {
                    let word_count = (byte_count + 1 + (byte_address & 1) as usize) / 2;
                    let data = self
                        .cmd_gen2_read_tag_data(
                            timeout,
                            bank as u8,
                            byte_address / 2,
                            word_count as u8,
                            password,
                            filter,
                        )
                        .await?;
                    let start = (byte_address & 1) as usize;
                    if data.len() < start + byte_count {
                        return Err(ReaderError::Parse("short read-data reply".to_string()));
                    }
                    Ok(data[start..start + byte_count].to_vec())
                } else {
                    self.cmd_gen2_read_tag_data(
                        timeout,
                        bank as u8,
                        byte_address / 2,
                        (byte_count / 2) as u8,
                        password,
                        filter,
                    )
                    .await
                }
            }
            TagProtocol::Iso180006b => {
                let timeout = self.command_timeout_ms as u16;
                self.cmd_iso180006b_read_tag_data(
                    timeout,
                    byte_address as u8,
                    byte_count as u8,
                    filter,
                )
                .await
            }
            _ => Err(ReaderError::Unimplemented),
        }
    }

    /// Writes 16-bit words of tag memory.
    pub async fn write_tag_mem_words(
        &mut self,
        filter: Option<&TagFilter>,
        bank: u32,
        word_address: u32,
        data: &[u16],
    ) -> Result<()> {
        let mut bytes = Vec::with_capacity(data.len() * 2);
        for word in data {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        self.write_tag_mem_bytes(filter, bank, word_address * 2, &bytes)
            .await
    }

    /// Writes tag memory at byte granularity, honoring the configured write
    /// mode. Misaligned Gen2 writes are rejected.
    pub async fn write_tag_mem_bytes(
        &mut self,
        filter: Option<&TagFilter>,
        bank: u32,
        byte_address: u32,
        data: &[u8],
    ) -> Result<()> {
        let protocol = self.tag_op_params.protocol;
        self.set_protocol(protocol).await?;

        match protocol {
            TagProtocol::Gen2 => {
                if byte_address & 1 != 0 || data.len() & 1 != 0 {
                    return Err(ReaderError::Invalid("misaligned Gen2 write"));
                }
                let timeout = self.command_timeout_ms as u16;
                let password = self.gen2_access_password;
                let word_address = byte_address / 2;
                let word_count = (data.len() / 2) as u8;

                match self.write_mode {
                    Gen2WriteMode::WordOnly => {
                        self.cmd_gen2_write_tag_data(
                            timeout,
                            bank as u8,
                            word_address,
                            data,
                            password,
                            filter,
                        )
                        .await
                    }
                    Gen2WriteMode::BlockOnly => {
                        self.cmd_block_write(
                            timeout,
                            bank as u8,
                            word_address,
                            word_count,
                            data,
                            password,
                            filter,
                        )
                        .await
                    }
                    Gen2WriteMode::BlockFallback => {
                        match self
                            .cmd_block_write(
                                timeout,
                                bank as u8,
                                word_address,
                                word_count,
                                data,
                                password,
                                filter,
                            )
                            .await
                        {
                            Ok(()) => Ok(()),
                            Err(_) => {
                                self.cmd_gen2_write_tag_data(
                                    timeout,
                                    bank as u8,
                                    word_address,
                                    data,
                                    password,
                                    filter,
                                )
                                .await
                            }
                        }
                    }
                }
            }
            TagProtocol::Iso180006b => {
                if data.len() != 1 {
                    return Err(ReaderError::Invalid("ISO 18000-6B writes one byte"));
                }
                let timeout = self.command_timeout_ms as u16;
                self.cmd_iso180006b_write_tag_data(timeout, byte_address as u8, data, filter)
                    .await
            }
            _ => Err(ReaderError::Invalid("unsupported tag-op protocol")),
        }
    }

    /// Applies a lock action to the tag in view.
    pub async fn lock_tag(&mut self, filter: Option<&TagFilter>, action: LockAction) -> Result<()> {
        let protocol = self.tag_op_params.protocol;
        self.set_protocol(protocol).await?;
        let timeout = self.command_timeout_ms as u16;

        match protocol {
            TagProtocol::Gen2 => match action {
                LockAction::Gen2(lock) => {
                    let password = self.gen2_access_password;
                    self.cmd_gen2_lock_tag(timeout, lock.mask, lock.action, password, filter)
                        .await
                }
                _ => Err(ReaderError::Invalid("lock type does not match protocol")),
            },
            TagProtocol::Iso180006b => match action {
                LockAction::Iso180006b(lock) => {
                    self.cmd_iso180006b_lock_tag(timeout, lock.address, filter).await
                }
                _ => Err(ReaderError::Invalid("lock type does not match protocol")),
            },
            _ => Err(ReaderError::Unimplemented),
        }
    }

    /// Permanently disables the tag in view.
    pub async fn kill_tag(
        &mut self,
        filter: Option<&TagFilter>,
        kill_password: Gen2Password,
    ) -> Result<()> {
        let protocol = self.tag_op_params.protocol;
        self.set_protocol(protocol).await?;

        if protocol == TagProtocol::Gen2 {
            let timeout = self.command_timeout_ms as u16;
            self.cmd_kill_tag(timeout, kill_password, filter).await
        } else {
            Err(ReaderError::Unimplemented)
        }
    }

    /// Reads or sets the block-permalock state of a range of memory blocks.
    /// With `read_lock == 0` the returned words are the current lock bitmap.
    pub async fn block_permalock(
        &mut self,
        filter: Option<&TagFilter>,
        read_lock: u8,
        bank: u32,
        block_ptr: u32,
        block_range: u8,
        mask: &[u16],
    ) -> Result<Vec<u16>> {
        let timeout = self.command_timeout_ms as u16;
        let password = self.gen2_access_password;
        self.cmd_block_permalock(
            timeout,
            read_lock,
            bank as u8,
            block_ptr,
            block_range,
            mask,
            password,
            filter,
        )
        .await
    }

    // ------------------------------------------------------------------
    // GPIO
    // ------------------------------------------------------------------

    /// Reads the input pins.
    pub async fn gpi_get(&mut self) -> Result<Vec<GpioPin>> {
        let states = self.cmd_get_gpio().await?;
        Ok(states
            .iter()
            .enumerate()
            .map(|(i, high)| GpioPin {
                id: i as u8 + 1,
                high: *high,
            })
            .collect())
    }

    /// Drives the output pins.
    pub async fn gpo_set(&mut self, states: &[GpioPin]) -> Result<()> {
        for pin in states {
            self.cmd_set_gpio(pin.id, pin.high).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // User profile
    // ------------------------------------------------------------------

    /// Saves, restores, verifies or clears the module-side configuration
    /// profile. Restore and clear reset the module, so the baud rate is
    /// re-probed the same way `connect` does it.
    pub async fn set_user_profile(
        &mut self,
        option: crate::reader::UserProfileOption,
    ) -> Result<()> {
        use crate::reader::UserProfileOption;

        let option_byte = match option {
            UserProfileOption::Save => USER_PROFILE_OPTION_SAVE,
            UserProfileOption::Restore => USER_PROFILE_OPTION_RESTORE,
            UserProfileOption::Verify => USER_PROFILE_OPTION_VERIFY,
            UserProfileOption::Clear => USER_PROFILE_OPTION_CLEAR,
        };
        let mut msg = MsgBuf::new(OPCODE_SET_USER_PROFILE);
        msg.put_u8(option_byte)?;
        msg.put_u8(USER_PROFILE_KEY_ALL)?;
        msg.put_u8(USER_PROFILE_VALUE_CUSTOM)?;
        self.send(msg.finish()).await?;

        if matches!(option, UserProfileOption::Restore | UserProfileOption::Clear) {
            if !self.connected {
                self.transport.open().await?;
            }
            debug!("re-probing baud rate after profile {option:?}");

            let mut contacted = false;
            for i in 0..=BAUD_FALLBACK_RATES.len() {
                let rate = if i == 0 {
                    self.baud_rate
                } else {
                    let rate = BAUD_FALLBACK_RATES[i - 1];
                    if rate == self.baud_rate {
                        continue;
                    }
                    rate
                };

                self.transport.set_baud_rate(rate).await?;
                self.transport.flush().await?;
                match self.cmd_version().await {
                    Ok(_) => {
                        contacted = true;
                        break;
                    }
                    Err(ReaderError::Timeout) => continue,
                    Err(e) => return Err(e),
                }
            }
            if !contacted {
                return Err(ReaderError::Timeout);
            }
            self.connected = true;
        }

        Ok(())
    }
}

/// Millisecond host clock split into two 32-bit halves.
fn host_time_ms() -> (u32, u32) {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    ((ms >> 32) as u32, ms as u32)
}
